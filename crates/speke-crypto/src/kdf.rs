//! Key derivation functions (HKDF-SHA256).
//!
//! The raw Diffie-Hellman output of the exchange is not uniform; HKDF
//! turns the hashed keying material into a uniform encryption key and
//! nonce sized for the build's cipher suite.

use crate::suite::{KEY_LEN, NONCE_LEN};
use crate::{Error, Result};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Generic HKDF-SHA256 key derivation per RFC 5869.
///
/// # Arguments
/// * `ikm` - Input key material
/// * `salt` - Salt value (empty slice for no salt)
/// * `info` - Context and application-specific information
/// * `output_len` - Length of output key material
///
/// # Returns
/// Derived key material wrapped in `Zeroizing`.
pub fn hkdf_sha256(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);

    let mut okm = vec![0u8; output_len];
    hk.expand(info, &mut okm)
        .map_err(|_| Error::KeyDerivation("HKDF expansion failed".into()))?;

    Ok(Zeroizing::new(okm))
}

/// Derive the encryption key and nonce from SPEKE keying material.
///
/// Uses HKDF-SHA256 with empty salt and empty info, expanded to
/// `KEY_LEN + NONCE_LEN` bytes. The first `KEY_LEN` bytes form the
/// encryption key, the remainder the nonce. Both peers feed in the same
/// keying material and arrive at the same pair.
pub fn derive_key_and_nonce(keying_material: &[u8]) -> Result<(Zeroizing<Vec<u8>>, Vec<u8>)> {
    let okm = hkdf_sha256(keying_material, &[], &[], KEY_LEN + NONCE_LEN)?;

    let key = Zeroizing::new(okm[..KEY_LEN].to_vec());
    let nonce = okm[KEY_LEN..].to_vec();

    Ok((key, nonce))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RFC 5869 Test Case 1.
    #[test]
    fn test_hkdf_rfc5869() {
        let ikm = hex::decode("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b").unwrap();
        let salt = hex::decode("000102030405060708090a0b0c").unwrap();
        let info = hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap();

        let okm = hkdf_sha256(&ikm, &salt, &info, 42).unwrap();

        let expected = hex::decode(
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865",
        )
        .unwrap();

        assert_eq!(&*okm, &expected);
    }

    #[test]
    fn test_key_and_nonce_lengths() {
        let (key, nonce) = derive_key_and_nonce(b"keying material").unwrap();

        assert_eq!(key.len(), KEY_LEN);
        assert_eq!(nonce.len(), NONCE_LEN);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let (key1, nonce1) = derive_key_and_nonce(b"same input").unwrap();
        let (key2, nonce2) = derive_key_and_nonce(b"same input").unwrap();

        assert_eq!(&*key1, &*key2);
        assert_eq!(nonce1, nonce2);
    }

    #[test]
    fn test_distinct_inputs_distinct_keys() {
        let (key1, _) = derive_key_and_nonce(b"input one").unwrap();
        let (key2, _) = derive_key_and_nonce(b"input two").unwrap();

        assert_ne!(&*key1, &*key2);
    }
}
