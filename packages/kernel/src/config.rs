//! Bus configuration.

use std::time::Duration;

use crate::error::KernelError;

/// Default deadline for a request/response round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of messages a single mailbox may hold.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// Default time `shutdown` waits for pooled work before aborting it.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default number of pooled tasks allowed to run at once.
pub const DEFAULT_POOL_CONCURRENCY: usize = 64;

/// Bus configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// How long `send_message` waits for a correlated reply.
    pub request_timeout: Duration,
    /// Maximum queued messages per service; further messages are rejected.
    pub mailbox_capacity: usize,
    /// Grace period for stopping services and draining the worker pool.
    pub shutdown_grace: Duration,
    /// Maximum number of pooled tasks running concurrently.
    pub pool_concurrency: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            pool_concurrency: DEFAULT_POOL_CONCURRENCY,
        }
    }
}

impl KernelConfig {
    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the per-service mailbox capacity.
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the worker pool concurrency.
    pub fn with_pool_concurrency(mut self, concurrency: usize) -> Self {
        self.pool_concurrency = concurrency;
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `BUS_REQUEST_TIMEOUT_MS` (default: 10000)
    /// - `BUS_MAILBOX_CAPACITY` (default: 1024)
    /// - `BUS_SHUTDOWN_GRACE_MS` (default: 5000)
    /// - `BUS_POOL_CONCURRENCY` (default: 64)
    pub fn from_env() -> Result<Self, KernelError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, KernelError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let cfg = Self {
            request_timeout: read_millis(&lookup, "BUS_REQUEST_TIMEOUT_MS")?
                .unwrap_or(defaults.request_timeout),
            mailbox_capacity: read_usize(&lookup, "BUS_MAILBOX_CAPACITY")?
                .unwrap_or(defaults.mailbox_capacity),
            shutdown_grace: read_millis(&lookup, "BUS_SHUTDOWN_GRACE_MS")?
                .unwrap_or(defaults.shutdown_grace),
            pool_concurrency: read_usize(&lookup, "BUS_POOL_CONCURRENCY")?
                .unwrap_or(defaults.pool_concurrency),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the bus cannot operate with.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.request_timeout.is_zero() {
            return Err(KernelError::InvalidConfig(
                "request timeout must be greater than zero".into(),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(KernelError::InvalidConfig(
                "mailbox capacity must be at least 1".into(),
            ));
        }
        if self.pool_concurrency == 0 {
            return Err(KernelError::InvalidConfig(
                "pool concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn read_usize<F>(lookup: &F, var_name: &str) -> Result<Option<usize>, KernelError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var_name).and_then(non_empty) {
        Some(v) => v.parse::<usize>().map(Some).map_err(|e| {
            KernelError::InvalidConfig(format!("invalid integer for {var_name}={v}: {e}"))
        }),
        None => Ok(None),
    }
}

fn read_millis<F>(lookup: &F, var_name: &str) -> Result<Option<Duration>, KernelError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var_name).and_then(non_empty) {
        Some(v) => v.parse::<u64>().map(|ms| Some(Duration::from_millis(ms))).map_err(|e| {
            KernelError::InvalidConfig(format!("invalid milliseconds for {var_name}={v}: {e}"))
        }),
        None => Ok(None),
    }
}
