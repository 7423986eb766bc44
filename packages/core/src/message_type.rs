//! Well-known message type tags and header keys.
//!
//! The bus itself only produces [`ERROR`]; every other tag belongs to the
//! services that exchange it.

/// Header carrying the id of the request a message answers.
pub const REPLY_TO: &str = "replyTo";

/// Address used by the bus for the messages it synthesizes.
pub const KERNEL_ADDRESS: &str = "MessageBus";

// Authentication
pub const AUTH_REQUEST: &str = "AUTH_REQUEST";
pub const AUTH_RESPONSE: &str = "AUTH_RESPONSE";
pub const SESSION_VALIDATE: &str = "SESSION_VALIDATE";

// Mail storage
pub const MAIL_STORE: &str = "MAIL_STORE";
pub const MAIL_RETRIEVE: &str = "MAIL_RETRIEVE";
pub const MAIL_LIST: &str = "MAIL_LIST";
pub const MAIL_DELETE: &str = "MAIL_DELETE";
pub const MAIL_MARK: &str = "MAIL_MARK";

// Mail transfer
pub const MAIL_SEND: &str = "MAIL_SEND";
pub const MAIL_STATUS: &str = "MAIL_STATUS";

// System
pub const HEARTBEAT: &str = "HEARTBEAT";
pub const ERROR: &str = "ERROR";
