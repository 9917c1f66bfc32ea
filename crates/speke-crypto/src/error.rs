//! Error types for cryptographic operations.

use thiserror::Error;

/// Result type alias for cryptographic operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Cryptographic operation errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied argument is unusable.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The supplied group modulus fails the safe-prime shape checks.
    #[error("Invalid safe prime: {0}")]
    InvalidPrime(String),

    /// The password hashed to a degenerate generator for this group.
    #[error("Password produces a degenerate generator for this group")]
    InvalidGenerator,

    /// The peer's public key or id failed validation.
    #[error("Invalid peer public key or id: {0}")]
    PeerKeyInvalid(String),

    /// The remote public key and id were already provided.
    #[error("Remote public key and id already provided")]
    AlreadyInitialized,

    /// The operation requires the remote public key and id first.
    #[error("{0} requires the remote public key and id")]
    NotInitialized(&'static str),

    /// Key derivation failed.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}
