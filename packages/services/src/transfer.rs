//! Mail transfer service: queued outbound delivery with retries.
//!
//! `MAIL_SEND` only records the task and answers `QUEUED`; the delivery
//! itself runs on the bus worker pool through a [`MailTransport`], so the
//! service keeps answering `MAIL_STATUS` while mail is in flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bus_core::Message;
use bus_core::message_type::{MAIL_SEND, MAIL_STATUS};
use chrono::Utc;
use kernel::{HandlerResult, Service, ServiceContext, ServiceError};

use crate::payload::{
    MailDraft, SendReceipt, TransferState, TransferStatus, json_reply, unknown_type,
};

/// Name the service registers under.
pub const SERVICE_NAME: &str = "MailTransferService";

/// Error reported by a [`MailTransport`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("recipient rejected: {0}")]
    Rejected(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Hands a mail to whatever actually delivers it.
pub trait MailTransport: Send + Sync + 'static {
    fn deliver(&self, mail: &MailDraft) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Transport that pretends to deliver after a fixed delay.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    delay: Duration,
}

impl SimulatedTransport {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl MailTransport for SimulatedTransport {
    async fn deliver(&self, mail: &MailDraft) -> Result<(), TransportError> {
        tokio::time::sleep(self.delay).await;
        tracing::debug!(
            "Sending mail from {} to {}: {}",
            mail.from,
            mail.to,
            mail.subject
        );
        Ok(())
    }
}

/// Configuration for [`MailTransferService`].
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Delay of the simulated transport.
    pub send_delay: Duration,
    /// Attempts per task before it is marked `FAILED`.
    pub max_attempts: u32,
    /// Base wait between attempts, multiplied by the attempt number.
    pub retry_backoff: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            send_delay: Duration::from_millis(100),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl TransferConfig {
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// Status of every task, shared with the delivery tasks.
#[derive(Debug, Default)]
struct TransferLedger {
    tasks: Mutex<HashMap<String, TransferStatus>>,
}

impl TransferLedger {
    fn tasks(&self) -> MutexGuard<'_, HashMap<String, TransferStatus>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self, task_id: &str) {
        self.tasks().insert(
            task_id.to_string(),
            TransferStatus {
                task_id: task_id.to_string(),
                status: TransferState::Queued,
                attempts: 0,
                last_attempt: 0,
            },
        );
    }

    fn begin_attempt(&self, task_id: &str) {
        if let Some(status) = self.tasks().get_mut(task_id) {
            status.status = TransferState::Sending;
            status.attempts += 1;
            status.last_attempt = Utc::now().timestamp_millis();
        }
    }

    fn set_state(&self, task_id: &str, state: TransferState) {
        if let Some(status) = self.tasks().get_mut(task_id) {
            status.status = state;
        }
    }

    fn get(&self, task_id: &str) -> Option<TransferStatus> {
        self.tasks().get(task_id).cloned()
    }

    fn unfinished(&self) -> usize {
        self.tasks()
            .values()
            .filter(|status| !status.status.is_terminal())
            .count()
    }
}

/// Accepts outbound mail and tracks its delivery.
pub struct MailTransferService<T: MailTransport = SimulatedTransport> {
    config: TransferConfig,
    transport: Arc<T>,
    ledger: Arc<TransferLedger>,
    next_id: u64,
}

impl MailTransferService<SimulatedTransport> {
    pub fn new(config: TransferConfig) -> Self {
        let transport = SimulatedTransport::new(config.send_delay);
        Self::with_transport(config, transport)
    }
}

impl Default for MailTransferService<SimulatedTransport> {
    fn default() -> Self {
        Self::new(TransferConfig::default())
    }
}

impl<T: MailTransport> MailTransferService<T> {
    /// Create a service delivering through `transport`.
    pub fn with_transport(config: TransferConfig, transport: T) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            ledger: Arc::new(TransferLedger::default()),
            next_id: 1,
        }
    }

    fn send(
        &mut self,
        ctx: &ServiceContext,
        draft: MailDraft,
    ) -> Result<SendReceipt, ServiceError> {
        let task_id = self.next_id.to_string();
        self.next_id += 1;
        self.ledger.queue(&task_id);

        let delivery = deliver(
            Arc::clone(&self.transport),
            Arc::clone(&self.ledger),
            task_id.clone(),
            draft,
            self.config.max_attempts,
            self.config.retry_backoff,
        );
        if let Err(e) = ctx.spawn_work(delivery) {
            self.ledger.set_state(&task_id, TransferState::Failed);
            return Err(e.into());
        }

        tracing::info!("Mail queued for transfer: {}", task_id);
        Ok(SendReceipt {
            success: true,
            task_id,
            status: TransferState::Queued,
        })
    }
}

/// Deliver one task, retrying with a linear backoff.
async fn deliver<T: MailTransport>(
    transport: Arc<T>,
    ledger: Arc<TransferLedger>,
    task_id: String,
    mail: MailDraft,
    max_attempts: u32,
    backoff: Duration,
) {
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        ledger.begin_attempt(&task_id);

        match transport.deliver(&mail).await {
            Ok(()) => {
                ledger.set_state(&task_id, TransferState::Sent);
                tracing::info!("Mail transfer {}: SUCCESS", task_id);
                return;
            }
            Err(e) => {
                let will_retry = attempt < max_attempts;
                tracing::warn!(
                    "Mail transfer {} attempt {}/{} failed: {} (will_retry={})",
                    task_id,
                    attempt,
                    max_attempts,
                    e,
                    will_retry
                );
                if will_retry {
                    ledger.set_state(&task_id, TransferState::Queued);
                    tokio::time::sleep(backoff * attempt).await;
                }
            }
        }
    }

    ledger.set_state(&task_id, TransferState::Failed);
    tracing::error!("Mail transfer {}: FAILED after {} attempts", task_id, max_attempts);
}

impl<T: MailTransport> Service for MailTransferService<T> {
    async fn initialize(&mut self, _ctx: &ServiceContext) -> Result<(), ServiceError> {
        tracing::info!("MailTransferService initialized");
        Ok(())
    }

    async fn handle(&mut self, ctx: &ServiceContext, message: Message) -> HandlerResult {
        let reply = match message.message_type() {
            MAIL_SEND => {
                let draft: MailDraft = message.decode_payload()?;
                let receipt = self.send(ctx, draft)?;
                json_reply(&message, SERVICE_NAME, MAIL_SEND, &receipt)?
            }
            MAIL_STATUS => {
                let task_id: String = message.decode_payload()?;
                match self.ledger.get(&task_id) {
                    Some(status) => json_reply(&message, SERVICE_NAME, MAIL_STATUS, &status)?,
                    None => {
                        message.error_reply(SERVICE_NAME, format!("Task not found: {}", task_id))
                    }
                }
            }
            _ => unknown_type(&message, SERVICE_NAME),
        };
        Ok(Some(reply))
    }

    async fn shutdown(&mut self, _ctx: &ServiceContext) {
        tracing::info!(
            "MailTransferService shutdown, {} tasks in queue",
            self.ledger.unfinished()
        );
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` deliveries.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl MailTransport for Flaky {
        async fn deliver(&self, _mail: &MailDraft) -> Result<(), TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(TransportError::Unavailable("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    fn draft() -> MailDraft {
        MailDraft {
            from: "user1".into(),
            to: "user2".into(),
            subject: "hi".into(),
            body: "there".into(),
        }
    }

    #[tokio::test]
    async fn retries_until_sent() {
        let ledger = Arc::new(TransferLedger::default());
        ledger.queue("1");
        let transport = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });

        deliver(
            transport,
            Arc::clone(&ledger),
            "1".into(),
            draft(),
            3,
            Duration::from_millis(1),
        )
        .await;

        let status = ledger.get("1").unwrap();
        assert_eq!(status.status, TransferState::Sent);
        assert_eq!(status.attempts, 3);
        assert!(status.last_attempt > 0);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let ledger = Arc::new(TransferLedger::default());
        ledger.queue("7");
        let transport = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });

        deliver(
            Arc::clone(&transport),
            Arc::clone(&ledger),
            "7".into(),
            draft(),
            2,
            Duration::from_millis(1),
        )
        .await;

        let status = ledger.get("7").unwrap();
        assert_eq!(status.status, TransferState::Failed);
        assert_eq!(status.attempts, 2);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert_eq!(ledger.unfinished(), 0);
    }
}
