//! Cipher parameter table.
//!
//! The session never encrypts on its own; it derives an encryption key and
//! nonce sized for the cipher the application will use. The suite is fixed
//! at build time, so there is no negotiation on the wire and both peers
//! must be built for the same parameters.

/// Symmetric cipher parameter sets supported by the key schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    /// ChaCha20-Poly1305 (RFC 8439).
    ChaCha20Poly1305,
    /// AES-256-GCM (NIST SP 800-38D).
    Aes256Gcm,
}

impl CipherSuite {
    /// Symmetric key length in bytes.
    pub const fn key_len(self) -> usize {
        match self {
            Self::ChaCha20Poly1305 | Self::Aes256Gcm => 32,
        }
    }

    /// Nonce (initialization vector) length in bytes.
    pub const fn nonce_len(self) -> usize {
        match self {
            Self::ChaCha20Poly1305 | Self::Aes256Gcm => 12,
        }
    }
}

/// Cipher the key schedule is built for.
pub const SUITE: CipherSuite = CipherSuite::ChaCha20Poly1305;

/// Length in bytes of the derived encryption key.
pub const KEY_LEN: usize = SUITE.key_len();

/// Length in bytes of the derived nonce.
pub const NONCE_LEN: usize = SUITE.nonce_len();

/// Digest length in bytes of the protocol hash (SHA-256).
pub const HASH_LEN: usize = 32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_lengths() {
        for suite in [CipherSuite::ChaCha20Poly1305, CipherSuite::Aes256Gcm] {
            assert_eq!(suite.key_len(), 32);
            assert_eq!(suite.nonce_len(), 12);
        }
    }

    #[test]
    fn test_build_constants_match_suite() {
        assert_eq!(KEY_LEN, SUITE.key_len());
        assert_eq!(NONCE_LEN, SUITE.nonce_len());
    }
}
