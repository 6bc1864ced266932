//! # natter-shared
//!
//! Types shared by the natter server and client: identifiers, the JSON
//! WebSocket event protocol, request/response bodies of the REST API and the
//! validation rules for outgoing messages.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ValidationError;
pub use types::{ConnectionId, MessageId, UserId};
