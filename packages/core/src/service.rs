//! Service lifecycle and introspection types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a hosted service.
///
/// Transitions only move forward:
/// `Created -> Initializing -> Running -> Stopping -> Stopped`.
/// A service whose initialization fails goes straight to `Stopped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ServiceState {
    #[default]
    Created = 0,
    Initializing = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
}

impl ServiceState {
    /// Decode the `repr(u8)` form. Unknown values map to `Stopped`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ServiceState::Created,
            1 => ServiceState::Initializing,
            2 => ServiceState::Running,
            3 => ServiceState::Stopping,
            _ => ServiceState::Stopped,
        }
    }

    /// Check if the service mailbox accepts new messages.
    pub fn is_accepting(&self) -> bool {
        matches!(self, ServiceState::Initializing | ServiceState::Running)
    }

    /// Check if the service has finished its lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Created => "created",
            ServiceState::Initializing => "initializing",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for a service's mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceStats {
    /// Messages waiting in the mailbox.
    pub queued: u64,
    /// Messages handled without error.
    pub processed: u64,
    /// Messages whose handler failed or panicked.
    pub failed: u64,
}

impl ServiceStats {
    /// Total messages taken out of the mailbox.
    pub fn handled(&self) -> u64 {
        self.processed + self.failed
    }
}

/// Snapshot of a registered service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub state: ServiceState,
    pub mailbox_capacity: usize,
    pub stats: ServiceStats,
    pub registered_at: DateTime<Utc>,
}
