//! Authentication service: credential checks and session tracking.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bus_core::Message;
use bus_core::message_type::{AUTH_REQUEST, AUTH_RESPONSE, SESSION_VALIDATE};
use kernel::{HandlerResult, Service, ServiceContext, ServiceError};
use ulid::Ulid;

use crate::payload::{
    AuthResponse, Credentials, Role, SessionValidation, json_reply, unknown_type,
};

/// Name the service registers under.
pub const SERVICE_NAME: &str = "AuthenticationService";

/// How long a session stays valid after login.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// A known user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub username: String,
    pub password: String,
    pub role: Role,
}

impl UserAccount {
    pub fn new(username: impl Into<String>, password: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            role,
        }
    }
}

/// Configuration for [`AuthenticationService`].
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub session_ttl: Duration,
    /// Accounts loaded when the service initializes.
    pub users: Vec<UserAccount>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl: DEFAULT_SESSION_TTL,
            users: Self::test_users(),
        }
    }
}

impl AuthConfig {
    /// The seeded development accounts.
    pub fn test_users() -> Vec<UserAccount> {
        vec![
            UserAccount::new("admin", "admin123", Role::Admin),
            UserAccount::new("user1", "pass123", Role::User),
            UserAccount::new("user2", "pass456", Role::User),
        ]
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }
}

#[derive(Debug, Clone)]
struct Session {
    username: String,
    role: Role,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Session {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Checks credentials and hands out sessions.
///
/// Passwords are compared as plain strings; credential policy is not this
/// service's concern.
#[derive(Debug)]
pub struct AuthenticationService {
    config: AuthConfig,
    users: HashMap<String, UserAccount>,
    sessions: HashMap<String, Session>,
}

impl AuthenticationService {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            users: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    fn load_users(&mut self) {
        self.users = self
            .config
            .users
            .iter()
            .map(|user| (user.username.clone(), user.clone()))
            .collect();
    }

    fn authenticate(&mut self, credentials: &Credentials) -> AuthResponse {
        let Some(user) = self
            .users
            .get(&credentials.username)
            .filter(|user| user.password == credentials.password)
        else {
            tracing::warn!("Authentication failed for user: {}", credentials.username);
            return AuthResponse {
                success: false,
                error: Some("Invalid credentials".to_string()),
                ..Default::default()
            };
        };

        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(now));
        if self.sessions.len() < before {
            tracing::debug!("Pruned {} expired sessions", before - self.sessions.len());
        }

        let session_id = Ulid::new().to_string();
        let expires_at = now.checked_add(self.config.session_ttl);
        self.sessions.insert(
            session_id.clone(),
            Session {
                username: user.username.clone(),
                role: user.role,
                expires_at,
            },
        );

        tracing::info!("User {} authenticated successfully", user.username);
        AuthResponse {
            success: true,
            session_id: Some(session_id),
            username: Some(user.username.clone()),
            role: Some(user.role),
            error: None,
        }
    }

    fn validate(&mut self, session_id: &str) -> SessionValidation {
        let now = Instant::now();
        match self.sessions.get(session_id) {
            Some(session) if !session.is_expired(now) => {
                return SessionValidation {
                    valid: true,
                    username: Some(session.username.clone()),
                    role: Some(session.role),
                };
            }
            Some(_) => {}
            None => return SessionValidation::default(),
        }

        self.sessions.remove(session_id);
        tracing::debug!("Session expired: {}", session_id);
        SessionValidation::default()
    }

    /// Number of sessions currently tracked, expired ones included.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for AuthenticationService {
    fn default() -> Self {
        Self::new(AuthConfig::default())
    }
}

impl Service for AuthenticationService {
    async fn initialize(&mut self, _ctx: &ServiceContext) -> Result<(), ServiceError> {
        self.load_users();
        tracing::info!("AuthenticationService initialized with {} users", self.users.len());
        Ok(())
    }

    async fn handle(&mut self, _ctx: &ServiceContext, message: Message) -> HandlerResult {
        let reply = match message.message_type() {
            AUTH_REQUEST => {
                let credentials: Credentials = message.decode_payload()?;
                let response = self.authenticate(&credentials);
                json_reply(&message, SERVICE_NAME, AUTH_RESPONSE, &response)?
            }
            SESSION_VALIDATE => {
                let session_id: String = message.decode_payload()?;
                let validation = self.validate(&session_id);
                json_reply(&message, SERVICE_NAME, AUTH_RESPONSE, &validation)?
            }
            _ => unknown_type(&message, SERVICE_NAME),
        };
        Ok(Some(reply))
    }

    async fn shutdown(&mut self, _ctx: &ServiceContext) {
        self.sessions.clear();
        tracing::info!("AuthenticationService shutdown");
    }
}
