#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use kernel::message_type::{ERROR, KERNEL_ADDRESS};
use kernel::{
    HandlerResult, KernelConfig, KernelEvent, Message, MessageBus, MessageId, Service,
    ServiceContext, ServiceError, ServiceState, service_fn,
};
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};

use common::{TEST_TIMEOUT, echo_service, request, started_bus};

/// Records integer payloads in arrival order.
struct Recorder {
    seen: Arc<Mutex<Vec<i64>>>,
}

impl Service for Recorder {
    async fn handle(&mut self, _ctx: &ServiceContext, message: Message) -> HandlerResult {
        if let Some(n) = message.payload().as_i64() {
            self.seen.lock().unwrap().push(n);
        }
        Ok(Some(message.reply("Recorder", "ACK", message.payload().clone())))
    }
}

/// Counts `TICK` messages and answers everything else.
struct Counter {
    name: &'static str,
    ticks: Arc<AtomicUsize>,
}

impl Service for Counter {
    async fn handle(&mut self, _ctx: &ServiceContext, message: Message) -> HandlerResult {
        if message.message_type() == "TICK" {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            return Ok(None);
        }
        Ok(Some(message.reply(self.name, "ACK", Value::Null)))
    }
}

/// Answers `SLOW` only after the caller has given up, reporting whether the
/// late reply still found a waiting caller.
struct Latecomer {
    accepted: mpsc::UnboundedSender<bool>,
}

impl Service for Latecomer {
    async fn handle(&mut self, ctx: &ServiceContext, message: Message) -> HandlerResult {
        if message.message_type() != "SLOW" {
            return Ok(Some(message.reply("Latecomer", "FAST", message.payload().clone())));
        }
        tokio::time::sleep(TEST_TIMEOUT + Duration::from_millis(100)).await;
        let late = message.reply("Latecomer", "LATE", Value::Null);
        let _ = self
            .accepted
            .send(ctx.bus().complete_request(message.id(), late.clone()));
        Ok(Some(late))
    }
}

/// Blocks on a gate after announcing that it started handling.
struct Gated {
    started: mpsc::UnboundedSender<()>,
    gate: Arc<Semaphore>,
}

impl Service for Gated {
    async fn handle(&mut self, _ctx: &ServiceContext, message: Message) -> HandlerResult {
        let _ = self.started.send(());
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        Ok(Some(message.reply("Gated", "DONE", "ok")))
    }
}

#[tokio::test]
async fn test_echo_roundtrip() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    bus.register_service("Echo", echo_service("Echo")).await?;

    let req = request("Client", "Echo", "PING", "hello");
    let reply = bus.send_message(req.clone()).await;

    assert_eq!(reply.message_type(), "ECHO");
    assert_eq!(reply.payload_str(), Some("hello"));
    assert_eq!(reply.from(), "Echo");
    assert_eq!(reply.to(), "Client");
    assert_eq!(reply.reply_to(), Some(req.id()));
    assert_eq!(bus.pending_requests(), 0);

    bus.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_service_calls_another_service() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    bus.register_service(
        "B",
        service_fn!(|_ctx, message| {
            let processed = format!("Processed: {}", message.payload_str().unwrap_or_default());
            Ok(Some(message.reply("B", "PROCESSED", processed)))
        }),
    )
    .await?;
    bus.register_service(
        "A",
        service_fn!(|ctx, message| {
            let forwarded = Message::builder()
                .from("A")
                .to("B")
                .message_type("PING")
                .payload(message.payload().clone())
                .build();
            let answer = ctx.send_message(forwarded).await;
            Ok(Some(message.reply("A", "FORWARDED", answer.payload().clone())))
        }),
    )
    .await?;

    let req = request("Client", "A", "PING", "x");
    let reply = bus.send_message(req.clone()).await;
    assert_eq!(reply.message_type(), "FORWARDED");
    assert_eq!(reply.payload_str(), Some("Processed: x"));
    assert_eq!(reply.reply_to(), Some(req.id()));

    // B still answers direct callers
    let direct = bus.send_message(request("Client", "B", "PING", "y")).await;
    assert_eq!(direct.payload_str(), Some("Processed: y"));
    assert_eq!(bus.pending_requests(), 0);

    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unknown_service_fails_fast() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    let req = request("Client", "Ghost", "PING", "x");

    let started = Instant::now();
    let reply = bus.send_message(req.clone()).await;

    assert!(started.elapsed() < TEST_TIMEOUT);
    assert_eq!(reply.message_type(), ERROR);
    assert_eq!(reply.payload_str(), Some("Service not found: Ghost"));
    assert_eq!(reply.from(), KERNEL_ADDRESS);
    assert_eq!(reply.to(), "Client");
    assert_eq!(reply.reply_to(), Some(req.id()));

    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_send_before_start_is_rejected() -> Result<(), Box<dyn Error>> {
    let bus = MessageBus::new(common::test_config());
    bus.register_service("Echo", echo_service("Echo")).await?;

    let reply = bus.send_message(request("Client", "Echo", "PING", "x")).await;
    assert!(reply.is_error());
    assert_eq!(reply.payload_str(), Some("Kernel is not running"));

    bus.start();
    let reply = bus.send_message(request("Client", "Echo", "PING", "x")).await;
    assert_eq!(reply.message_type(), "ECHO");

    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_reply_without_correlation_times_out() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    bus.register_service(
        "Forgetful",
        service_fn!(|_ctx, message| {
            // Not built with `reply`, so nothing names the request
            Ok(Some(
                Message::builder()
                    .from("Forgetful")
                    .to(message.from())
                    .message_type("PONG")
                    .build(),
            ))
        }),
    )
    .await?;

    let req = request("Client", "Forgetful", "PING", "x");
    let started = Instant::now();
    let reply = bus.send_message(req.clone()).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= TEST_TIMEOUT - Duration::from_millis(20));
    assert!(elapsed < TEST_TIMEOUT * 10);
    assert!(reply.is_error());
    assert_eq!(reply.payload_str(), Some("Request timeout"));
    assert_eq!(reply.reply_to(), Some(req.id()));
    assert_eq!(bus.pending_requests(), 0);

    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_messages_handled_in_arrival_order() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handle = bus
        .register_service(
            "Recorder",
            Recorder {
                seen: Arc::clone(&seen),
            },
        )
        .await?;

    for n in 0..50 {
        handle.receive(request("Client", "Recorder", "RECORD", n))?;
    }
    let reply = bus.send_message(request("Client", "Recorder", "SYNC", 50)).await;
    assert_eq!(reply.message_type(), "ACK");

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, (0..=50).collect::<Vec<i64>>());

    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_complete_request_is_idempotent() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    bus.register_service(
        "Twice",
        service_fn!(|ctx, message| {
            let first = message.reply("Twice", "FIRST", "1");
            assert!(ctx.bus().complete_request(message.id(), first));
            Ok(Some(message.reply("Twice", "SECOND", "2")))
        }),
    )
    .await?;

    let reply = bus.send_message(request("Client", "Twice", "PING", "x")).await;
    assert_eq!(reply.message_type(), "FIRST");

    let stray = request("Client", "Twice", "PING", "x");
    assert!(!bus.complete_request(MessageId::new(), stray));
    assert_eq!(bus.pending_requests(), 0);

    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_broadcast_reaches_registered_services_only() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    let a = Arc::new(AtomicUsize::new(0));
    let b = Arc::new(AtomicUsize::new(0));
    let c = Arc::new(AtomicUsize::new(0));

    bus.register_service(
        "A",
        Counter {
            name: "A",
            ticks: Arc::clone(&a),
        },
    )
    .await?;
    bus.register_service(
        "B",
        Counter {
            name: "B",
            ticks: Arc::clone(&b),
        },
    )
    .await?;

    let recipients = bus.broadcast_message(request("Client", "*", "TICK", 1));
    assert_eq!(recipients, 2);

    bus.register_service(
        "C",
        Counter {
            name: "C",
            ticks: Arc::clone(&c),
        },
    )
    .await?;

    // Mailboxes are FIFO, so a reply means the tick was handled
    for name in ["A", "B", "C"] {
        let reply = bus.send_message(request("Client", name, "SYNC", 0)).await;
        assert_eq!(reply.message_type(), "ACK");
    }

    assert_eq!(a.load(Ordering::SeqCst), 1);
    assert_eq!(b.load(Ordering::SeqCst), 1);
    assert_eq!(c.load(Ordering::SeqCst), 0);

    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_handler_failure_answers_fast_and_service_survives() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    let handle = bus
        .register_service(
            "Fragile",
            service_fn!(|_ctx, message| {
                match message.message_type() {
                    "FAIL" => Err(ServiceError::failed("boom")),
                    "PANIC" => panic!("kaboom"),
                    _ => Ok(Some(message.reply("Fragile", "OK", "fine"))),
                }
            }),
        )
        .await?;

    let started = Instant::now();
    let reply = bus.send_message(request("Client", "Fragile", "FAIL", "x")).await;
    assert!(started.elapsed() < TEST_TIMEOUT);
    assert!(reply.is_error());
    assert_eq!(reply.payload_str(), Some("Execution error: boom"));

    let reply = bus.send_message(request("Client", "Fragile", "PANIC", "x")).await;
    assert!(reply.is_error());
    assert!(reply.payload_str().unwrap_or_default().contains("kaboom"));

    let reply = bus.send_message(request("Client", "Fragile", "PING", "x")).await;
    assert_eq!(reply.message_type(), "OK");

    assert!(handle.is_running());
    let info = handle.info();
    assert_eq!(info.stats.failed, 2);
    assert_eq!(info.stats.processed, 1);

    bus.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_mailbox_rejects() -> Result<(), Box<dyn Error>> {
    let bus = MessageBus::new(common::test_config().with_mailbox_capacity(1));
    bus.start();

    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let gate = Arc::new(Semaphore::new(0));
    let handle = bus
        .register_service(
            "Gated",
            Gated {
                started: started_tx,
                gate: Arc::clone(&gate),
            },
        )
        .await?;

    // One message in the handler, one waiting in the mailbox
    handle.receive(request("Client", "Gated", "WORK", 1))?;
    started_rx.recv().await;
    handle.receive(request("Client", "Gated", "WORK", 2))?;

    let reply = bus.send_message(request("Client", "Gated", "WORK", 3)).await;
    assert!(reply.is_error());
    assert!(
        reply
            .payload_str()
            .unwrap_or_default()
            .starts_with("Execution error: Mailbox full")
    );

    gate.add_permits(3);
    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_reregister_replaces_and_stops_previous() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    let first = bus.register_service("Svc", echo_service("v1")).await?;
    let second = bus.register_service("Svc", echo_service("v2")).await?;

    assert_eq!(first.state(), ServiceState::Stopped);
    assert!(second.is_running());

    let current = bus.get_service("Svc").ok_or("Svc missing")?;
    assert!(current.same_service(&second));
    assert!(!current.same_service(&first));

    let reply = bus.send_message(request("Client", "Svc", "PING", "x")).await;
    assert_eq!(reply.from(), "v2");
    assert_eq!(bus.list_services().len(), 1);

    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unregister_stops_service() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    let handle = bus.register_service("Echo", echo_service("Echo")).await?;

    assert!(bus.unregister_service("Echo").await);
    assert!(!bus.unregister_service("Echo").await);
    assert_eq!(handle.state(), ServiceState::Stopped);
    assert!(bus.get_service("Echo").is_none());

    let reply = bus.send_message(request("Client", "Echo", "PING", "x")).await;
    assert_eq!(reply.payload_str(), Some("Service not found: Echo"));

    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_stops_everything() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    for name in ["One", "Two", "Three"] {
        bus.register_service(name, echo_service(name)).await?;
    }
    assert!(bus.list_services().iter().all(|s| s.state == ServiceState::Running));

    bus.shutdown().await;

    assert!(!bus.is_running());
    let services = bus.list_services();
    assert_eq!(services.len(), 3);
    assert!(services.iter().all(|s| s.state == ServiceState::Stopped));

    let reply = bus.send_message(request("Client", "One", "PING", "x")).await;
    assert_eq!(reply.payload_str(), Some("Kernel is not running"));

    // Second shutdown is a no-op
    bus.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_leave_no_pending() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    bus.register_service("Echo", echo_service("Echo")).await?;

    let mut tasks = tokio::task::JoinSet::new();
    for n in 0..100 {
        let bus = bus.clone();
        tasks.spawn(async move {
            let reply = bus.send_message(request("Client", "Echo", "PING", n)).await;
            (n, reply)
        });
    }
    while let Some(result) = tasks.join_next().await {
        let (n, reply) = result?;
        assert_eq!(reply.payload().as_i64(), Some(n));
    }

    assert_eq!(bus.pending_requests(), 0);
    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_events_published() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    let mut events = bus.subscribe();
    bus.register_service("Echo", echo_service("Echo")).await?;

    let registered = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match events.recv().await {
                Ok(KernelEvent::ServiceRegistered { name, .. }) => return Some(name),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await?;
    assert_eq!(registered.as_deref(), Some("Echo"));

    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_spawn_work_runs_on_pool() -> Result<(), Box<dyn Error>> {
    let bus = MessageBus::new(KernelConfig::default().with_pool_concurrency(2));
    let (tx, mut rx) = mpsc::unbounded_channel();
    for n in 0..4 {
        let tx = tx.clone();
        bus.spawn_work(async move {
            let _ = tx.send(n);
        })?;
    }
    drop(tx);

    let mut got = Vec::new();
    while let Some(n) = rx.recv().await {
        got.push(n);
    }
    got.sort();
    assert_eq!(got, vec![0, 1, 2, 3]);

    bus.shutdown().await;
    assert!(bus.spawn_work(async {}).is_err());
    Ok(())
}

#[tokio::test]
async fn test_duplicate_in_flight_request_is_rejected() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    bus.register_service(
        "Slow",
        service_fn!(|_ctx, message| {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Some(message.reply("Slow", "DONE", "ok")))
        }),
    )
    .await?;

    let req = request("Client", "Slow", "PING", "x");
    let (first, second) = tokio::join!(
        bus.send_message(req.clone()),
        bus.send_message(req.clone())
    );

    let (answered, rejected) = if first.is_error() {
        (second, first)
    } else {
        (first, second)
    };
    assert_eq!(answered.message_type(), "DONE");
    assert_eq!(answered.reply_to(), Some(req.id()));
    assert!(rejected.is_error());
    assert_eq!(
        rejected.payload_str(),
        Some(format!("Request already pending: {}", req.id()).as_str())
    );
    assert_eq!(bus.pending_requests(), 0);

    // Once the first caller is done the id can be sent again
    let again = bus.send_message(req.clone()).await;
    assert_eq!(again.message_type(), "DONE");

    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_reply_after_timeout_is_dropped() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel();
    bus.register_service(
        "Latecomer",
        Latecomer {
            accepted: accepted_tx,
        },
    )
    .await?;

    let slow = request("Client", "Latecomer", "SLOW", "x");
    let reply = bus.send_message(slow.clone()).await;
    assert_eq!(reply.payload_str(), Some("Request timeout"));
    assert_eq!(bus.pending_requests(), 0);

    assert_eq!(accepted_rx.recv().await, Some(false));
    assert_eq!(bus.pending_requests(), 0);

    let next = request("Client", "Latecomer", "PING", 7);
    let reply = bus.send_message(next.clone()).await;
    assert_eq!(reply.message_type(), "FAST");
    assert_eq!(reply.reply_to(), Some(next.id()));
    assert_eq!(reply.payload().as_i64(), Some(7));

    bus.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_stop_runs_once() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    let handle = bus.register_service("Echo", echo_service("Echo")).await?;
    let mut events = bus.subscribe();

    let grace = Duration::from_millis(200);
    tokio::join!(handle.stop(grace), handle.stop(grace), handle.stop(grace));
    assert_eq!(handle.state(), ServiceState::Stopped);

    let mut stopping = 0;
    let mut stopped = 0;
    while let Ok(event) = events.try_recv() {
        if let KernelEvent::ServiceStateChanged { new_state, .. } = event {
            match new_state {
                ServiceState::Stopping => stopping += 1,
                ServiceState::Stopped => stopped += 1,
                _ => {}
            }
        }
    }
    assert_eq!(stopping, 1);
    assert_eq!(stopped, 1);

    bus.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_clears_queued_count() -> Result<(), Box<dyn Error>> {
    let bus = started_bus();
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let handle = bus
        .register_service(
            "Gated",
            Gated {
                started: started_tx,
                gate: Arc::new(Semaphore::new(0)),
            },
        )
        .await?;

    handle.receive(request("Client", "Gated", "WORK", 1))?;
    started_rx.recv().await;
    handle.receive(request("Client", "Gated", "WORK", 2))?;
    handle.receive(request("Client", "Gated", "WORK", 3))?;
    assert_eq!(handle.info().stats.queued, 2);

    // The gate never opens, so the stop has to abort the handler
    handle.stop(Duration::from_millis(50)).await;

    let info = handle.info();
    assert_eq!(info.state, ServiceState::Stopped);
    assert_eq!(info.stats.queued, 0);

    bus.shutdown().await;
    Ok(())
}
