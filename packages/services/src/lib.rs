//! Mail services hosted on the message bus.
//!
//! - `AuthenticationService` - credential checks and sessions
//! - `MailStorageService` - per-recipient mailbox store
//! - `MailTransferService` - queued outbound delivery with retries
//!
//! Each one talks to callers only through messages; see
//! [`bus_core::message_type`] for the types they answer.

pub mod auth;
mod init;
pub mod payload;
pub mod storage;
pub mod transfer;

pub use auth::{AuthConfig, AuthenticationService, UserAccount};
pub use init::{MailServicesConfig, init_mail_services, init_mail_services_with};
pub use payload::{
    AuthResponse, Credentials, ListQuery, MailDraft, MailListing, MailRecord, MailSummary,
    MarkRequest, Outcome, Role, SendReceipt, SessionValidation, StoreReceipt, TransferState,
    TransferStatus,
};
pub use storage::MailStorageService;
pub use transfer::{
    MailTransferService, MailTransport, SimulatedTransport, TransferConfig, TransportError,
};
