use thiserror::Error;

/// Request payloads rejected before anything is persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message must contain text or an image")]
    EmptyMessage,

    #[error("Message text too long: {len} chars (max {max})")]
    TextTooLong { len: usize, max: usize },

    #[error("Missing details: {0}")]
    MissingField(&'static str),

    #[error("Invalid email address")]
    InvalidEmail,
}
