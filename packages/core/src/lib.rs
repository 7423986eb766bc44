//! Core domain types for the message bus.
//!
//! This crate contains shared types used across all packages:
//! - Message and MessageId for the immutable envelope
//! - Message type tags and the `replyTo` header key
//! - ServiceState and ServiceInfo for hosted services
//! - Events for observing the bus

mod events;
mod message;
pub mod message_type;
mod service;

pub use events::KernelEvent;
pub use message::{Message, MessageBuilder, MessageId, PayloadError};
pub use service::{ServiceInfo, ServiceState, ServiceStats};
