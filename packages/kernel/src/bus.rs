//! The message bus: registry, routing, correlation and shutdown.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bus_core::message_type::{ERROR, KERNEL_ADDRESS, REPLY_TO};
use bus_core::{KernelEvent, Message, MessageId, ServiceInfo};
use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::broadcast;

use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::pending::PendingRequests;
use crate::pool::WorkerPool;
use crate::registry::ServiceRegistry;
use crate::runtime::ServiceHandle;
use crate::service::{Service, ServiceContext};

struct BusInner {
    config: KernelConfig,
    running: AtomicBool,
    registry: ServiceRegistry,
    pending: Arc<PendingRequests>,
    pool: WorkerPool,
    event_tx: broadcast::Sender<KernelEvent>,
}

/// In-process message bus hosting named services.
///
/// Cloning is cheap and every clone drives the same bus. Requests are
/// answered asynchronously: [`MessageBus::send_message`] enqueues the
/// message in the target's mailbox and waits, bounded by the configured
/// timeout, for a reply whose `replyTo` header names the request.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Create a stopped bus with the given configuration.
    pub fn new(config: KernelConfig) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        let pool = WorkerPool::new(config.pool_concurrency);
        Self {
            inner: Arc::new(BusInner {
                config,
                running: AtomicBool::new(false),
                registry: ServiceRegistry::new(),
                pending: Arc::new(PendingRequests::new()),
                pool,
                event_tx,
            }),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }

    /// Start accepting requests.
    pub fn start(&self) {
        if !self.inner.running.swap(true, Ordering::AcqRel) {
            tracing::info!("MessageBus started");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Subscribe to bus events.
    pub fn subscribe(&self) -> broadcast::Receiver<KernelEvent> {
        self.inner.event_tx.subscribe()
    }

    fn publish(&self, event: KernelEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    /// Start `service` and bind it to `name`.
    ///
    /// The service is initialized on its own task before the binding becomes
    /// visible. If `name` was already bound, the previous service is stopped
    /// once the new one has replaced it.
    pub async fn register_service<S: Service>(
        &self,
        name: impl Into<String>,
        service: S,
    ) -> KernelResult<ServiceHandle> {
        let name = name.into();
        let handle = ServiceHandle::new(
            &name,
            self.inner.config.mailbox_capacity,
            self.inner.event_tx.clone(),
        );
        handle
            .start(service, ServiceContext::new(&name, self.clone()))
            .await?;

        if let Some(previous) = self.inner.registry.insert(&name, handle.clone()) {
            tracing::warn!("Service {} re-registered, stopping previous instance", name);
            previous.stop(self.inner.config.shutdown_grace).await;
        }

        self.publish(KernelEvent::ServiceRegistered {
            name: name.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!("Service registered: {}", name);
        Ok(handle)
    }

    /// Remove the binding for `name` and stop the service.
    ///
    /// Returns `false` if nothing was registered under `name`.
    pub async fn unregister_service(&self, name: &str) -> bool {
        let Some(handle) = self.inner.registry.remove(name) else {
            return false;
        };

        handle.stop(self.inner.config.shutdown_grace).await;
        self.publish(KernelEvent::ServiceUnregistered {
            name: name.to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!("Service unregistered: {}", name);
        true
    }

    /// Get a service by name.
    pub fn get_service(&self, name: &str) -> Option<ServiceHandle> {
        self.inner.registry.get(name)
    }

    /// Snapshot of every registered service.
    pub fn list_services(&self) -> Vec<ServiceInfo> {
        let mut services: Vec<ServiceInfo> = self
            .inner
            .registry
            .handles()
            .iter()
            .map(ServiceHandle::info)
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    /// Send a request and wait for its correlated reply.
    ///
    /// Never fails: routing errors, delivery and handler failures, and
    /// timeouts come back as `ERROR` messages addressed to the sender with
    /// `replyTo` set to the request id.
    pub async fn send_message(&self, message: Message) -> Message {
        if !self.is_running() {
            return kernel_error(&message, &KernelError::NotRunning);
        }

        let Some(target) = self.inner.registry.get(message.to()) else {
            tracing::warn!("Target service not found: {}", message.to());
            return kernel_error(&message, &KernelError::ServiceNotFound(message.to().into()));
        };

        let (_guard, reply) = match self.inner.pending.register(message.id()) {
            Ok(slot) => slot,
            Err(e) => {
                tracing::warn!("Rejected {}: {}", message, e);
                return kernel_error(&message, &e);
            }
        };

        if let Err(e) = target.receive(message.clone()) {
            tracing::warn!("Failed to deliver {}: {}", message, e);
            return execution_error(message.id(), message.from(), &e.to_string());
        }

        match tokio::time::timeout(self.inner.config.request_timeout, reply).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => execution_error(message.id(), message.from(), "reply slot closed"),
            Err(_) => {
                tracing::warn!("Message timeout: {}", message.id());
                self.publish(KernelEvent::RequestTimedOut {
                    message_id: message.id(),
                    to: message.to().to_string(),
                    timestamp: Utc::now(),
                });
                kernel_error(&message, &KernelError::Timeout)
            }
        }
    }

    /// Enqueue `message` in every service registered right now.
    ///
    /// Best effort: no reply is awaited, and services whose mailbox rejects
    /// the message are skipped. Returns how many mailboxes accepted it.
    pub fn broadcast_message(&self, message: Message) -> usize {
        let mut recipients = 0;
        for handle in self.inner.registry.handles() {
            match handle.receive(message.clone()) {
                Ok(()) => recipients += 1,
                Err(e) => tracing::warn!("Broadcast {} skipped {}: {}", message, handle.name(), e),
            }
        }

        self.publish(KernelEvent::MessageBroadcast {
            message_id: message.id(),
            recipients,
            timestamp: Utc::now(),
        });
        recipients
    }

    /// Resolve the pending request `id` with `response`.
    ///
    /// A response for a request that already completed, timed out or was
    /// never sent is dropped and `false` is returned.
    pub fn complete_request(&self, id: MessageId, response: Message) -> bool {
        self.inner.pending.complete(id, response)
    }

    /// Answer a waiting caller with the failure of the service handling `id`.
    pub(crate) fn fail_request(&self, id: MessageId, caller: &str, service: &str, error: &str) {
        self.publish(KernelEvent::HandlerFailed {
            service: service.to_string(),
            message_id: id,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        self.inner
            .pending
            .complete(id, execution_error(id, caller, error));
    }

    /// Number of requests waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Run blind work on the shared worker pool.
    pub fn spawn_work<F>(&self, work: F) -> KernelResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.pool.spawn(work)
    }

    /// Stop accepting requests, stop every service, then drain the pool.
    pub async fn shutdown(&self) {
        self.inner.running.store(false, Ordering::Release);
        tracing::info!("Shutting down MessageBus");

        let grace = self.inner.config.shutdown_grace;
        let handles = self.inner.registry.handles();
        join_all(handles.iter().map(|handle| handle.stop(grace))).await;

        let aborted = self.inner.pool.shutdown(grace).await;
        if aborted > 0 {
            tracing::warn!("Aborted {} pooled tasks during shutdown", aborted);
        }
        self.inner.pending.clear();

        tracing::info!("MessageBus shutdown");
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("running", &self.is_running())
            .field("services", &self.inner.registry.names())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

fn kernel_error(request: &Message, error: &KernelError) -> Message {
    request.error_reply(KERNEL_ADDRESS, error.to_string())
}

fn execution_error(id: MessageId, caller: &str, error: &str) -> Message {
    Message::builder()
        .from(KERNEL_ADDRESS)
        .to(caller)
        .message_type(ERROR)
        .payload(format!("Execution error: {}", error))
        .header(REPLY_TO, id.to_string())
        .build()
}
