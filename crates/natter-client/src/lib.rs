//! # natter-client
//!
//! Client-side core for Natter: REST access to the server, the event socket,
//! and the chat session state that keeps per-peer unseen counts consistent
//! with the server.

pub mod config;
pub mod error;
pub mod http;
pub mod reconciler;
pub mod socket;
pub mod unseen;

pub use config::{ClientConfig, ResyncPolicy};
pub use error::ClientError;
pub use http::HttpBackend;
pub use reconciler::{ChatBackend, ChatSession};
pub use socket::{drive, EventSocket};
pub use unseen::UnseenCounters;
