//! Error types for session and transport operations.

use thiserror::Error;

/// Result type alias for session and transport operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Session and transport errors.
///
/// These are the errors surfaced to API callers. Runtime failures induced
/// by the peer (bad signatures, invalid keys, disconnects) are absorbed
/// into the session's terminal state instead and never reach the message
/// handler.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation is not permitted in the current session state.
    #[error("Invalid session state: {0}")]
    BadState(String),

    /// A caller-supplied argument is unusable.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The peer closed the connection.
    #[error("Peer disconnected")]
    PeerDisconnected,

    /// Connection establishment failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Envelope codec error.
    #[error("Envelope error: {0}")]
    Envelope(#[from] speke_core::Error),

    /// Cryptographic error from the engine.
    #[error("Crypto error: {0}")]
    Crypto(#[from] speke_crypto::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
