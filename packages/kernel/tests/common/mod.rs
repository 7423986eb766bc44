#![allow(dead_code)]

use std::time::Duration;

use kernel::{KernelConfig, Message, MessageBus, Service, service_fn};
use serde_json::Value;

pub const TEST_TIMEOUT: Duration = Duration::from_millis(300);

pub fn test_config() -> KernelConfig {
    KernelConfig::default()
        .with_request_timeout(TEST_TIMEOUT)
        .with_shutdown_grace(Duration::from_millis(500))
}

/// A bus that is already accepting requests.
pub fn started_bus() -> MessageBus {
    let bus = MessageBus::new(test_config());
    bus.start();
    bus
}

pub fn request(from: &str, to: &str, message_type: &str, payload: impl Into<Value>) -> Message {
    Message::builder()
        .from(from)
        .to(to)
        .message_type(message_type)
        .payload(payload)
        .build()
}

/// Replies `ECHO` with the request payload.
pub fn echo_service(name: &'static str) -> impl Service {
    service_fn!(|_ctx, message| {
        Ok(Some(message.reply(name, "ECHO", message.payload().clone())))
    })
}
