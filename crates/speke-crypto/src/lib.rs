//! Cryptographic engine for SPEKE password-authenticated key exchange.
//!
//! This crate implements the cryptographic half of the session protocol:
//! - Generator derivation from a shared password over a safe-prime group
//! - Ephemeral keypair generation and Diffie-Hellman shared-secret
//!   computation (`engine`)
//! - Key derivation (HKDF-SHA256, `kdf`)
//! - Key confirmation and per-message HMAC signing (`engine`)
//! - Process-wide engine id numbering (`registry`)
//!
//! The engine performs no I/O; the session layer drives it with material
//! received from the wire.
//!
//! Security requirements:
//! - No unsafe code
//! - Derived keys use `Zeroizing` wrappers
//! - Constant-time comparisons via the `subtle` crate
//! - No logging of key material

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod kdf;
pub mod registry;
pub mod suite;

pub use engine::SpekeEngine;
pub use error::{Error, Result};
pub use suite::{CipherSuite, HASH_LEN, KEY_LEN, NONCE_LEN};
