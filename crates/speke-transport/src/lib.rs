//! Session driver and transports for the SPEKE protocol.
//!
//! Binds a [`speke_crypto::SpekeEngine`] to a connected byte stream and
//! drives the protocol:
//! - Handshake message ordering (init data, then key confirmation)
//! - Authenticated data framing with per-message HMAC verification
//! - Failure-mode classification into terminal session states
//!
//! The session is generic over the stream; anything implementing tokio's
//! `AsyncRead + AsyncWrite` works. [`tcp::TcpEndpoint`] and
//! [`local::LocalEndpoint`] produce suitable TCP and Unix-domain streams.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
#[cfg(unix)]
pub mod local;
pub mod session;
pub mod tcp;

pub use error::{Error, Result};
pub use session::{MessageHandler, SessionHandle, SessionState, SpekeSession, BAD_BEHAVIOR_LIMIT};
