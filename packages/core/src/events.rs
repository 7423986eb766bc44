//! Event types for observing the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MessageId, ServiceState};

/// Events emitted by the bus for observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum KernelEvent {
    // Service events
    /// A service was bound to a name.
    ServiceRegistered {
        name: String,
        timestamp: DateTime<Utc>,
    },
    /// A service binding was removed.
    ServiceUnregistered {
        name: String,
        timestamp: DateTime<Utc>,
    },
    /// A service moved through its lifecycle.
    ServiceStateChanged {
        name: String,
        old_state: ServiceState,
        new_state: ServiceState,
        timestamp: DateTime<Utc>,
    },

    // Message events
    /// A request got no correlated reply before the deadline.
    RequestTimedOut {
        message_id: MessageId,
        to: String,
        timestamp: DateTime<Utc>,
    },
    /// A handler returned an error or panicked.
    HandlerFailed {
        service: String,
        message_id: MessageId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A message was fanned out to every registered service.
    MessageBroadcast {
        message_id: MessageId,
        recipients: usize,
        timestamp: DateTime<Utc>,
    },
}

impl KernelEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            KernelEvent::ServiceRegistered { timestamp, .. } => *timestamp,
            KernelEvent::ServiceUnregistered { timestamp, .. } => *timestamp,
            KernelEvent::ServiceStateChanged { timestamp, .. } => *timestamp,
            KernelEvent::RequestTimedOut { timestamp, .. } => *timestamp,
            KernelEvent::HandlerFailed { timestamp, .. } => *timestamp,
            KernelEvent::MessageBroadcast { timestamp, .. } => *timestamp,
        }
    }

    /// Get the service name associated with this event, if any.
    pub fn service(&self) -> Option<&str> {
        match self {
            KernelEvent::ServiceRegistered { name, .. } => Some(name),
            KernelEvent::ServiceUnregistered { name, .. } => Some(name),
            KernelEvent::ServiceStateChanged { name, .. } => Some(name),
            KernelEvent::RequestTimedOut { to, .. } => Some(to),
            KernelEvent::HandlerFailed { service, .. } => Some(service),
            KernelEvent::MessageBroadcast { .. } => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            KernelEvent::ServiceRegistered { name, .. } => format!("Service {} registered", name),
            KernelEvent::ServiceUnregistered { name, .. } => {
                format!("Service {} unregistered", name)
            }
            KernelEvent::ServiceStateChanged {
                name,
                old_state,
                new_state,
                ..
            } => format!("Service {}: {} -> {}", name, old_state, new_state),
            KernelEvent::RequestTimedOut { message_id, to, .. } => {
                format!("Request {} to {} timed out", message_id, to)
            }
            KernelEvent::HandlerFailed {
                service,
                message_id,
                error,
                ..
            } => format!("Service {} failed on {}: {}", service, message_id, error),
            KernelEvent::MessageBroadcast {
                message_id,
                recipients,
                ..
            } => format!("Message {} broadcast to {} services", message_id, recipients),
        }
    }
}
