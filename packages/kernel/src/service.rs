//! Service trait implemented by everything the bus hosts.

use std::future::Future;
use std::pin::Pin;

use bus_core::Message;

use crate::bus::MessageBus;
use crate::error::{KernelError, ServiceError};

/// Result type for service handlers.
///
/// `Ok(Some(reply))` answers the caller when the reply's `replyTo` header
/// names the request; `Ok(None)` means there is nothing to send back.
pub type HandlerResult = Result<Option<Message>, ServiceError>;

/// Future type for boxed handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// What a service sees of the bus while it runs.
#[derive(Clone)]
pub struct ServiceContext {
    name: String,
    bus: MessageBus,
}

impl ServiceContext {
    pub(crate) fn new(name: impl Into<String>, bus: MessageBus) -> Self {
        Self {
            name: name.into(),
            bus,
        }
    }

    /// Name the service is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Send a request through the bus and wait for the correlated reply.
    pub async fn send_message(&self, message: Message) -> Message {
        self.bus.send_message(message).await
    }

    /// Run blind work on the bus worker pool.
    pub fn spawn_work<F>(&self, work: F) -> Result<(), KernelError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.bus.spawn_work(work)
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A named unit of message handling hosted by the bus.
///
/// Every message for a service is handled on that service's own task, one
/// at a time and in mailbox order, so `&mut self` needs no locking. Handlers
/// must not block the thread; waiting on other services is fine because it
/// only suspends this service's task.
pub trait Service: Send + 'static {
    /// Called once inside the service task before the first message.
    fn initialize(
        &mut self,
        _ctx: &ServiceContext,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send {
        async { Ok(()) }
    }

    /// Handle one message.
    fn handle(
        &mut self,
        ctx: &ServiceContext,
        message: Message,
    ) -> impl Future<Output = HandlerResult> + Send;

    /// Called once when the service stops.
    fn shutdown(&mut self, _ctx: &ServiceContext) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// A simple function-based service.
pub struct FnService<F>
where
    F: FnMut(&ServiceContext, Message) -> HandlerFuture + Send + 'static,
{
    handler: F,
}

impl<F> FnService<F>
where
    F: FnMut(&ServiceContext, Message) -> HandlerFuture + Send + 'static,
{
    /// Create a new function-based service.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> Service for FnService<F>
where
    F: FnMut(&ServiceContext, Message) -> HandlerFuture + Send + 'static,
{
    fn handle(
        &mut self,
        ctx: &ServiceContext,
        message: Message,
    ) -> impl Future<Output = HandlerResult> + Send {
        (self.handler)(ctx, message)
    }
}

/// Helper macro for creating services from async closures.
///
/// The body sees the context as `$ctx` (a cloned [`ServiceContext`]) and the
/// message by value. Captured variables are moved into the service and must
/// be `Copy`, such as a `&'static str` naming the service.
#[macro_export]
macro_rules! service_fn {
    (|$ctx:ident, $message:ident| $body:expr) => {
        $crate::FnService::new(
            move |ctx: &$crate::ServiceContext, $message: $crate::Message| {
                let $ctx = ctx.clone();
                Box::pin(async move {
                    let result: $crate::HandlerResult = $body;
                    result
                }) as $crate::HandlerFuture
            },
        )
    };
}
