//! Envelope parsing and serialization.
//!
//! Every frame on the stream is a length prefix followed by a tagged body:
//!
//! ```text
//! frame := length:u64le ∥ body
//! body  := tag:u8 ∥ fields
//!
//! tag 0x01  InitData        { id: field, public_key: field }
//! tag 0x02  KeyConfirmation { data: field }
//! tag 0x03  SignedData      { hmac_signature: field, data: field }
//!
//! field := length:u32le ∥ bytes
//! ```
//!
//! The frame length is pinned to 8 bytes little-endian so the format is
//! identical across platforms. All field length prefixes are 4-byte
//! little-endian. Trailing bytes after the last field are rejected.

use crate::{Error, Result};

/// Number of bytes in the frame length prefix.
pub const FRAME_LEN_BYTES: usize = 8;

/// Upper bound on the size of a single envelope body (16 MiB).
///
/// A peer controls the length prefix; the bound keeps a hostile value from
/// forcing an arbitrarily large allocation before parsing fails.
pub const MAX_ENVELOPE_LEN: u64 = 16 * 1024 * 1024;

/// Tag identifying an InitData body (0x01).
pub const TAG_INIT_DATA: u8 = 0x01;
/// Tag identifying a KeyConfirmation body (0x02).
pub const TAG_KEY_CONFIRMATION: u8 = 0x02;
/// Tag identifying a SignedData body (0x03).
pub const TAG_SIGNED_DATA: u8 = 0x03;

/// A protocol message; exactly one variant travels per frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Handshake opener carrying the sender's numbered id and public key.
    InitData {
        /// Sender's numbered id (UTF-8).
        id: String,
        /// Sender's public key, big-endian.
        public_key: Vec<u8>,
    },

    /// Key-confirmation digest proving possession of the derived key.
    KeyConfirmation {
        /// HMAC digest over both ids and both public keys.
        data: Vec<u8>,
    },

    /// Authenticated application payload.
    SignedData {
        /// HMAC signature over `data` under the derived encryption key.
        hmac_signature: Vec<u8>,
        /// Application payload.
        data: Vec<u8>,
    },
}

impl Envelope {
    /// Parse an envelope body (without the frame length prefix).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InsufficientData(1));
        }

        let tag = data[0];
        let body = &data[1..];

        match tag {
            TAG_INIT_DATA => Self::parse_init_data(body),
            TAG_KEY_CONFIRMATION => Self::parse_key_confirmation(body),
            TAG_SIGNED_DATA => Self::parse_signed_data(body),
            _ => Err(Error::InvalidEnvelope(format!(
                "unknown envelope tag: 0x{:02X}",
                tag
            ))),
        }
    }

    /// Serialize the envelope body (without the frame length prefix).
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Envelope::InitData { id, public_key } => {
                buf.push(TAG_INIT_DATA);
                write_field(&mut buf, id.as_bytes());
                write_field(&mut buf, public_key);
            }
            Envelope::KeyConfirmation { data } => {
                buf.push(TAG_KEY_CONFIRMATION);
                write_field(&mut buf, data);
            }
            Envelope::SignedData {
                hmac_signature,
                data,
            } => {
                buf.push(TAG_SIGNED_DATA);
                write_field(&mut buf, hmac_signature);
                write_field(&mut buf, data);
            }
        }
        buf
    }

    /// Serialize the envelope with its frame length prefix prepended,
    /// ready to be written to the stream.
    pub fn encode_framed(&self) -> Vec<u8> {
        let body = self.serialize();
        let mut frame = Vec::with_capacity(FRAME_LEN_BYTES + body.len());
        frame.extend_from_slice(&(body.len() as u64).to_le_bytes());
        frame.extend_from_slice(&body);
        frame
    }

    fn parse_init_data(data: &[u8]) -> Result<Self> {
        let (id_bytes, rest) = read_field(data)?;
        let id = std::str::from_utf8(id_bytes)
            .map_err(|_| Error::InvalidEnvelope("init data id is not valid UTF-8".into()))?
            .to_string();
        let (public_key, rest) = read_field(rest)?;
        expect_consumed(rest)?;

        Ok(Envelope::InitData {
            id,
            public_key: public_key.to_vec(),
        })
    }

    fn parse_key_confirmation(data: &[u8]) -> Result<Self> {
        let (kcd, rest) = read_field(data)?;
        expect_consumed(rest)?;

        Ok(Envelope::KeyConfirmation {
            data: kcd.to_vec(),
        })
    }

    fn parse_signed_data(data: &[u8]) -> Result<Self> {
        let (hmac_signature, rest) = read_field(data)?;
        let (payload, rest) = read_field(rest)?;
        expect_consumed(rest)?;

        Ok(Envelope::SignedData {
            hmac_signature: hmac_signature.to_vec(),
            data: payload.to_vec(),
        })
    }
}

// === Helper functions ===

fn read_field(data: &[u8]) -> Result<(&[u8], &[u8])> {
    check_len(data, 4)?;
    let len = read_u32_le(&data[0..4]) as usize;
    let rest = &data[4..];
    check_len(rest, len)?;
    Ok((&rest[..len], &rest[len..]))
}

fn write_field(buf: &mut Vec<u8>, field: &[u8]) {
    buf.extend_from_slice(&(field.len() as u32).to_le_bytes());
    buf.extend_from_slice(field);
}

fn expect_consumed(rest: &[u8]) -> Result<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidEnvelope(format!(
            "{} trailing bytes after the last field",
            rest.len()
        )))
    }
}

#[inline]
fn check_len(data: &[u8], needed: usize) -> Result<()> {
    if data.len() < needed {
        Err(Error::InsufficientData(needed - data.len()))
    } else {
        Ok(())
    }
}

#[inline]
fn read_u32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}
