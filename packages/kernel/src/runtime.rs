//! Actor runtime hosting a single service.
//!
//! Each service runs inside its own ractor actor. The actor's mailbox
//! serializes every message for the service, the handler runs on the
//! actor's task, and failures are contained here so one bad message never
//! takes the service down.

use std::any::Any;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bus_core::{KernelEvent, Message, ServiceInfo, ServiceState, ServiceStats};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::error::KernelError;
use crate::service::{Service, ServiceContext};

/// Shared state of one hosted service.
struct ServiceCell {
    name: String,
    state: AtomicU8,
    capacity: usize,
    /// Messages admitted to the mailbox and not yet taken by the handler.
    queued: AtomicUsize,
    processed: AtomicU64,
    failed: AtomicU64,
    registered_at: DateTime<Utc>,
    actor: OnceLock<ActorRef<Message>>,
    task: Mutex<Option<JoinHandle<()>>>,
    event_tx: broadcast::Sender<KernelEvent>,
}

impl ServiceCell {
    fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; returns `false` if the state was not `from`.
    fn transition(&self, from: ServiceState, to: ServiceState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            self.announce(from, to);
        }
        moved
    }

    /// Enter `Stopping` from any live state; returns the state left behind.
    fn begin_stop(&self) -> Option<ServiceState> {
        let previous = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                match ServiceState::from_u8(raw) {
                    ServiceState::Stopping | ServiceState::Stopped => None,
                    _ => Some(ServiceState::Stopping as u8),
                }
            })
            .ok()
            .map(ServiceState::from_u8)?;
        self.announce(previous, ServiceState::Stopping);
        Some(previous)
    }

    fn announce(&self, old_state: ServiceState, new_state: ServiceState) {
        tracing::debug!("Service {}: {} -> {}", self.name, old_state, new_state);
        let _ = self.event_tx.send(KernelEvent::ServiceStateChanged {
            name: self.name.clone(),
            old_state,
            new_state,
            timestamp: Utc::now(),
        });
    }

    fn admit(&self) -> Result<(), KernelError> {
        self.queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| KernelError::MailboxFull {
                name: self.name.clone(),
                capacity: self.capacity,
            })
    }

    fn dequeued(&self) {
        let _ = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Handle to a service registered with the bus.
///
/// Clones refer to the same running service; use
/// [`ServiceHandle::same_service`] to compare them.
#[derive(Clone)]
pub struct ServiceHandle {
    cell: Arc<ServiceCell>,
}

impl ServiceHandle {
    pub(crate) fn new(
        name: impl Into<String>,
        capacity: usize,
        event_tx: broadcast::Sender<KernelEvent>,
    ) -> Self {
        Self {
            cell: Arc::new(ServiceCell {
                name: name.into(),
                state: AtomicU8::new(ServiceState::Created as u8),
                capacity: capacity.max(1),
                queued: AtomicUsize::new(0),
                processed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                registered_at: Utc::now(),
                actor: OnceLock::new(),
                task: Mutex::new(None),
                event_tx,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    pub fn state(&self) -> ServiceState {
        self.cell.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    /// Check whether two handles refer to the same service instance.
    pub fn same_service(&self, other: &ServiceHandle) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Snapshot of the service's state and counters.
    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: self.cell.name.clone(),
            state: self.state(),
            mailbox_capacity: self.cell.capacity,
            stats: ServiceStats {
                queued: self.cell.queued.load(Ordering::Acquire) as u64,
                processed: self.cell.processed.load(Ordering::Acquire),
                failed: self.cell.failed.load(Ordering::Acquire),
            },
            registered_at: self.cell.registered_at,
        }
    }

    /// Enqueue a message without waiting for it to be handled.
    ///
    /// Fails when the service is not accepting messages or its mailbox is
    /// at capacity; a full mailbox rejects rather than blocks.
    pub fn receive(&self, message: Message) -> Result<(), KernelError> {
        let cell = &self.cell;
        if !cell.state().is_accepting() {
            return Err(KernelError::ServiceNotRunning(cell.name.clone()));
        }
        let Some(actor) = cell.actor.get() else {
            return Err(KernelError::ServiceNotRunning(cell.name.clone()));
        };

        cell.admit()?;
        if let Err(e) = actor.send_message(message) {
            cell.dequeued();
            return Err(KernelError::Delivery(format!("{}: {}", cell.name, e)));
        }
        Ok(())
    }

    /// Spawn the actor for `service` and drive it to `Running`.
    ///
    /// Returns `Ok(false)` if this handle was already started; the service
    /// passed in is dropped in that case.
    pub(crate) async fn start<S: Service>(
        &self,
        service: S,
        ctx: ServiceContext,
    ) -> Result<bool, KernelError> {
        let cell = &self.cell;
        if !cell.transition(ServiceState::Created, ServiceState::Initializing) {
            return Ok(false);
        }

        let args = ServiceArgs {
            service,
            ctx,
            cell: Arc::clone(cell),
        };
        let (actor, task) = match Actor::spawn(None, ServiceActor::<S>::new(), args).await {
            Ok(spawned) => spawned,
            Err(e) => {
                cell.state.store(ServiceState::Stopped as u8, Ordering::Release);
                cell.announce(ServiceState::Initializing, ServiceState::Stopped);
                return Err(KernelError::Spawn {
                    name: cell.name.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let _ = cell.actor.set(actor.clone());
        *cell.task.lock().await = Some(task);

        if !cell.transition(ServiceState::Initializing, ServiceState::Running) {
            // A stop raced with start-up and may have missed the actor.
            actor.stop(None);
            if let Some(task) = cell.task.lock().await.take() {
                let _ = task.await;
            }
            cell.state.store(ServiceState::Stopped as u8, Ordering::Release);
            return Ok(true);
        }

        tracing::info!("Service {} started", cell.name);
        Ok(true)
    }

    /// Stop the service, waiting up to `grace` for its current message.
    ///
    /// Messages still queued are discarded. Calling `stop` on a service that
    /// is already stopping or stopped has no effect.
    pub async fn stop(&self, grace: Duration) {
        let cell = &self.cell;
        if cell.begin_stop().is_none() {
            return;
        }

        if let Some(actor) = cell.actor.get() {
            actor.stop(None);
        }

        let task = cell.task.lock().await.take();
        if let Some(mut task) = task
            && tokio::time::timeout(grace, &mut task).await.is_err()
        {
            tracing::warn!(
                "Service {} did not stop within {:?}, aborting",
                cell.name,
                grace
            );
            task.abort();
        }

        // Whatever was still queued died with the actor
        cell.queued.store(0, Ordering::Release);
        cell.transition(ServiceState::Stopping, ServiceState::Stopped);
        tracing::info!("Service {} stopped", cell.name);
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.cell.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Ractor actor driving a [`Service`].
struct ServiceActor<S> {
    _service: PhantomData<fn() -> S>,
}

impl<S> ServiceActor<S> {
    fn new() -> Self {
        Self {
            _service: PhantomData,
        }
    }
}

/// Arguments handed to the actor on spawn.
struct ServiceArgs<S> {
    service: S,
    ctx: ServiceContext,
    cell: Arc<ServiceCell>,
}

/// State owned by the actor task.
struct ServiceActorState<S> {
    service: S,
    ctx: ServiceContext,
    cell: Arc<ServiceCell>,
}

impl<S: Service> Actor for ServiceActor<S> {
    type Msg = Message;
    type State = ServiceActorState<S>;
    type Arguments = ServiceArgs<S>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let ServiceArgs {
            mut service,
            ctx,
            cell,
        } = args;
        tracing::info!("Initializing service: {}", cell.name);
        service.initialize(&ctx).await?;
        Ok(ServiceActorState { service, ctx, cell })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.cell.dequeued();

        let request_id = message.id();
        let caller = message.from().to_string();
        tracing::debug!("{} handling {}", state.cell.name, message);

        let outcome = AssertUnwindSafe(state.service.handle(&state.ctx, message))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(response)) => {
                state.cell.processed.fetch_add(1, Ordering::AcqRel);
                if let Some(response) = response
                    && let Some(reply_to) = response.reply_to()
                {
                    state.ctx.bus().complete_request(reply_to, response);
                }
                None
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(panic_message(panic.as_ref())),
        };

        if let Some(error) = failure {
            state.cell.failed.fetch_add(1, Ordering::AcqRel);
            tracing::error!(
                "Error processing message {} in service {}: {}",
                request_id,
                state.cell.name,
                error
            );
            state
                .ctx
                .bus()
                .fail_request(request_id, &caller, &state.cell.name, &error);
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.service.shutdown(&state.ctx).await;
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}
