//! Bootstrap for the mail services.

use kernel::{KernelResult, MessageBus};

use crate::auth::{self, AuthConfig, AuthenticationService};
use crate::storage::{self, MailStorageService};
use crate::transfer::{self, MailTransferService, TransferConfig};

/// Settings for every mail service.
#[derive(Debug, Clone, Default)]
pub struct MailServicesConfig {
    pub auth: AuthConfig,
    pub transfer: TransferConfig,
}

/// Register the mail services with default settings.
///
/// This should be called once at server startup, after the bus is created.
pub async fn init_mail_services(bus: &MessageBus) -> KernelResult<()> {
    init_mail_services_with(bus, MailServicesConfig::default()).await
}

/// Register the mail services under their canonical names.
pub async fn init_mail_services_with(
    bus: &MessageBus,
    config: MailServicesConfig,
) -> KernelResult<()> {
    tracing::info!("Initializing mail services...");

    bus.register_service(auth::SERVICE_NAME, AuthenticationService::new(config.auth))
        .await?;
    bus.register_service(storage::SERVICE_NAME, MailStorageService::new())
        .await?;
    bus.register_service(transfer::SERVICE_NAME, MailTransferService::new(config.transfer))
        .await?;

    tracing::info!("Mail services initialized");
    Ok(())
}
