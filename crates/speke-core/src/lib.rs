//! Wire protocol core for the SPEKE session layer.
//!
//! This crate defines the on-wire message envelope and its codec:
//! - Length-prefixed framing (8-byte little-endian length, then body)
//! - A tagged body carrying exactly one of three payload variants
//!   (`InitData`, `KeyConfirmation`, `SignedData`)
//!
//! The codec is sans-I/O: it maps between byte slices and [`Envelope`]
//! values. Reading and writing frames on an actual stream is the session
//! layer's job.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod error;

pub use envelope::Envelope;
pub use error::{Error, Result};
