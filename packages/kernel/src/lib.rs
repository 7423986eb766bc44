//! In-process message bus.
//!
//! Services register under a name and exchange [`Message`]s through a
//! [`MessageBus`]. Each service runs in its own ractor actor, so its handler
//! sees one message at a time in arrival order while different services run
//! concurrently.
//!
//! # Architecture
//!
//! - `MessageBus` - Registry, routing, request/reply correlation, shutdown
//! - `ServiceHandle` - Mailbox and lifecycle of one hosted service
//! - `PendingRequests` - Reply slots keyed by request id
//! - `WorkerPool` - Bounded pool for blind background work
//!
//! # Usage
//!
//! ```ignore
//! use kernel::{MessageBus, KernelConfig, Message, service_fn};
//!
//! let bus = MessageBus::new(KernelConfig::from_env()?);
//! bus.start();
//! bus.register_service("Echo", service_fn!(|_ctx, message| {
//!     Ok(Some(message.reply("Echo", "ECHO", message.payload().clone())))
//! })).await?;
//!
//! let reply = bus.send_message(request).await;
//! ```

mod bus;
pub mod config;
mod error;
mod pending;
mod pool;
pub mod registry;
mod runtime;
mod service;

pub use bus::MessageBus;
pub use config::KernelConfig;
pub use error::{KernelError, KernelResult, ServiceError};
pub use pending::{PendingGuard, PendingRequests};
pub use pool::WorkerPool;
pub use registry::ServiceRegistry;
pub use runtime::ServiceHandle;
pub use service::{FnService, HandlerFuture, HandlerResult, Service, ServiceContext};

pub use bus_core::{
    KernelEvent, Message, MessageBuilder, MessageId, PayloadError, ServiceInfo, ServiceState,
    ServiceStats, message_type,
};
