//! Typed payloads exchanged with the mail services.
//!
//! Field names follow the camelCase wire shape callers already use
//! (`mailId`, `sessionId`, `lastAttempt`, ...).

use bus_core::{Message, PayloadError};
use kernel::ServiceError;
use serde::{Deserialize, Serialize};

/// Default page size for `MAIL_LIST`.
pub const DEFAULT_LIST_LIMIT: usize = 10;

/// Role granted to an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    User,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "ADMIN"),
            Role::User => write!(f, "USER"),
        }
    }
}

/// `AUTH_REQUEST` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// `AUTH_RESPONSE` to an `AUTH_REQUEST`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `AUTH_RESPONSE` to a `SESSION_VALIDATE`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionValidation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// A mail as submitted to `MAIL_STORE` or `MAIL_SEND`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailDraft {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

/// Reply to `MAIL_STORE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreReceipt {
    pub success: bool,
    pub mail_id: String,
}

/// A stored mail, as returned by `MAIL_RETRIEVE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailRecord {
    pub mail_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub read: bool,
}

/// One entry of a `MAIL_LIST` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailSummary {
    pub mail_id: String,
    pub from: String,
    pub subject: String,
    pub timestamp: i64,
    pub read: bool,
}

impl From<&MailRecord> for MailSummary {
    fn from(mail: &MailRecord) -> Self {
        Self {
            mail_id: mail.mail_id.clone(),
            from: mail.from.clone(),
            subject: mail.subject.clone(),
            timestamp: mail.timestamp,
            read: mail.read,
        }
    }
}

/// `MAIL_LIST` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub username: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

/// Reply to `MAIL_LIST`; `total` counts every mail, not just this page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailListing {
    pub mails: Vec<MailSummary>,
    pub total: usize,
}

/// `MAIL_MARK` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRequest {
    pub mail_id: String,
    pub read: bool,
}

/// Reply to `MAIL_DELETE` and `MAIL_MARK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
}

/// Delivery state of a transfer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferState {
    Queued,
    Sending,
    Sent,
    Failed,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Sent | TransferState::Failed)
    }
}

/// Reply to `MAIL_SEND`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub success: bool,
    pub task_id: String,
    pub status: TransferState,
}

/// Reply to `MAIL_STATUS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatus {
    pub task_id: String,
    pub status: TransferState,
    pub attempts: u32,
    /// Milliseconds since the Unix epoch of the latest attempt, 0 if none.
    pub last_attempt: i64,
}

/// Build a correlated reply whose payload is `body` serialized as JSON.
pub(crate) fn json_reply<T: Serialize>(
    request: &Message,
    from: &str,
    message_type: &str,
    body: &T,
) -> Result<Message, ServiceError> {
    let payload = serde_json::to_value(body).map_err(PayloadError::from)?;
    Ok(request.reply(from, message_type, payload))
}

/// Reply `ERROR` for a message type the service does not handle.
pub(crate) fn unknown_type(request: &Message, from: &str) -> Message {
    let error = ServiceError::UnknownType(request.message_type().to_string());
    request.error_reply(from, error.to_string())
}
