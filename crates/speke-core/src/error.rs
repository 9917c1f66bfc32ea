//! Error types for envelope encoding and decoding.

use thiserror::Error;

/// Result type alias for codec operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Envelope codec errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The envelope body is malformed.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// The input ended before a complete field could be read.
    #[error("Insufficient data: need at least {0} more bytes")]
    InsufficientData(usize),

    /// The frame length prefix exceeds the acceptable bound.
    #[error("Envelope length {0} exceeds the maximum")]
    OversizedEnvelope(u64),
}
