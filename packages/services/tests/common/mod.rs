#![allow(dead_code)]

use std::time::Duration;

use kernel::{KernelConfig, KernelResult, Message, MessageBus};
use mail_services::{MailServicesConfig, TransferConfig, init_mail_services_with};
use serde_json::Value;

/// A started bus with every mail service registered and fast delivery.
pub async fn setup_bus() -> KernelResult<MessageBus> {
    let bus = MessageBus::new(
        KernelConfig::default()
            .with_request_timeout(Duration::from_secs(2))
            .with_shutdown_grace(Duration::from_millis(500)),
    );
    bus.start();

    let config = MailServicesConfig {
        transfer: TransferConfig::default()
            .with_send_delay(Duration::from_millis(10))
            .with_retry_backoff(Duration::from_millis(5)),
        ..Default::default()
    };
    init_mail_services_with(&bus, config).await?;
    Ok(bus)
}

pub fn request(to: &str, message_type: &str, payload: Value) -> Message {
    Message::builder()
        .from("TestClient")
        .to(to)
        .message_type(message_type)
        .payload(payload)
        .build()
}
