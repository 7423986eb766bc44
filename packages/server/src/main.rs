use kernel::{KernelConfig, MessageBus};
use mail_services::{AuthConfig, init_mail_services};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = KernelConfig::from_env()?;
    tracing::info!(
        "Starting mail server (request timeout {:?}, mailbox capacity {})",
        config.request_timeout,
        config.mailbox_capacity
    );

    let bus = MessageBus::new(config);
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!("{}", event.description()),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event log lagged, skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    bus.start();
    init_mail_services(&bus).await?;

    tracing::info!("Mail server started");
    for user in AuthConfig::test_users() {
        tracing::info!("Test user: {} / {} ({})", user.username, user.password, user.role);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    bus.shutdown().await;
    Ok(())
}
