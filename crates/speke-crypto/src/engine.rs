//! Simple Password Exponential Key Exchange (SPEKE) state machine.
//!
//! A [`SpekeEngine`] holds one side of a SPEKE exchange. Both parties
//! construct an engine from a shared secret password and a shared,
//! non-secret safe prime `p = 2q + 1`. The password is hashed and squared
//! modulo `p` to obtain a generator of the order-`q` subgroup, and a
//! standard Diffie-Hellman exchange runs over that generator: because the
//! generator itself depends on the password, only a peer that knows the
//! password arrives at the same shared secret.
//!
//! The engine exposes the local public key and numbered id for the caller
//! to send out, ingests the peer's pair exactly once via
//! [`SpekeEngine::provide_remote_pair`], and from then on serves the
//! derived encryption key, nonce, key-confirmation data and HMAC
//! operations. Unlike the textbook SPEKE description, key confirmation and
//! message signing run under the HKDF-derived encryption key rather than
//! the raw Diffie-Hellman output.
//!
//! # Example
//!
//! ```no_run
//! use num_bigint::BigUint;
//! use speke_crypto::SpekeEngine;
//!
//! # fn example(safe_prime: BigUint) -> Result<(), speke_crypto::Error> {
//! let mut alice = SpekeEngine::new("alice", b"hunter2", safe_prime.clone())?;
//! let mut bob = SpekeEngine::new("bob", b"hunter2", safe_prime)?;
//!
//! alice.provide_remote_pair(&bob.public_key(), bob.id())?;
//! bob.provide_remote_pair(&alice.public_key(), alice.id())?;
//!
//! assert_eq!(alice.encryption_key()?, bob.encryption_key()?);
//! assert!(alice.confirm_key(bob.key_confirmation_data()?)?);
//! # Ok(())
//! # }
//! ```

use crate::registry;
use crate::suite::HASH_LEN;
use crate::{kdf, Error, Result};
use hmac::{Hmac, Mac};
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// One side of a SPEKE password-authenticated key exchange.
///
/// The engine is a pure state object: it performs no I/O and all of its
/// operations are synchronous modular arithmetic and hashing. A session
/// layer feeds it the peer's public key and id and relays the derived
/// confirmation data and signatures.
pub struct SpekeEngine {
    /// Safe prime `p = 2q + 1` shared with the peer.
    p: BigUint,
    /// `H(password)^2 mod p`, a quadratic residue generating the
    /// subgroup of order `q = (p - 1) / 2`.
    generator: BigUint,
    /// Random value in `[1, q - 1]`.
    privkey: BigUint,
    /// `generator^privkey mod p`.
    pubkey: BigUint,
    /// Caller id with the process-wide counter appended.
    id_numbered: String,
    /// Peer material and everything derived from it, set exactly once.
    remote: Option<RemoteState>,
}

/// Material derived when the remote pair is accepted. Immutable afterwards.
struct RemoteState {
    remote_id_numbered: String,
    remote_pubkey: BigUint,
    encryption_key: Zeroizing<Vec<u8>>,
    nonce: Vec<u8>,
    /// Confirmation digest this side sends to the peer.
    kcd_local: Vec<u8>,
    /// Confirmation digest expected from the peer.
    kcd_remote: Vec<u8>,
}

impl SpekeEngine {
    /// Create an engine for one exchange.
    ///
    /// `safe_prime` must be a prime of the form `p = 2q + 1` with `q`
    /// prime. Primality is not verified here; callers are expected to
    /// supply a vetted group such as an RFC 3526 MODP prime.
    ///
    /// The id the peer will see is `id` with a process-wide counter
    /// appended; see [`SpekeEngine::id`].
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `id` is empty.
    /// - [`Error::InvalidPrime`] if `safe_prime` is even or too small.
    /// - [`Error::InvalidGenerator`] if the password hashes to a trivial
    ///   generator for this group (only realistic for toy-sized primes).
    pub fn new(id: &str, password: &[u8], safe_prime: BigUint) -> Result<Self> {
        if id.is_empty() {
            return Err(Error::InvalidArgument("id must not be empty".into()));
        }

        let one = BigUint::from(1u32);
        let two = BigUint::from(2u32);
        if safe_prime <= two {
            return Err(Error::InvalidPrime("modulus must be greater than 2".into()));
        }
        if !safe_prime.bit(0) {
            return Err(Error::InvalidPrime("modulus must be odd".into()));
        }

        let q = (&safe_prime - &one) >> 1usize;
        let generator = derive_generator(password, &safe_prime)?;

        // Uniform in [1, q - 1]; gen_biguint_range excludes the upper bound.
        let mut rng = OsRng;
        let privkey = rng.gen_biguint_range(&one, &q);
        let pubkey = generator.modpow(&privkey, &safe_prime);

        let id_numbered = registry::global().numbered_id(id);

        Ok(Self {
            p: safe_prime,
            generator,
            privkey,
            pubkey,
            id_numbered,
            remote: None,
        })
    }

    /// The local public key as big-endian bytes, to be sent to the peer.
    pub fn public_key(&self) -> Vec<u8> {
        self.pubkey.to_bytes_be()
    }

    /// The numbered id to send to the peer alongside the public key.
    ///
    /// This differs from the id given to [`SpekeEngine::new`]: a counter
    /// is appended so repeated constructions with the same id present
    /// distinct identities.
    pub fn id(&self) -> &str {
        &self.id_numbered
    }

    /// Whether the remote pair has been accepted and keys derived.
    pub fn is_initialized(&self) -> bool {
        self.remote.is_some()
    }

    /// The peer's numbered id, as provided on the wire.
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] before the remote pair is provided.
    pub fn remote_id(&self) -> Result<&str> {
        Ok(&self.remote_state("remote_id")?.remote_id_numbered)
    }

    /// The peer's public key as big-endian bytes.
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] before the remote pair is provided.
    pub fn remote_public_key(&self) -> Result<Vec<u8>> {
        Ok(self.remote_state("remote_public_key")?.remote_pubkey.to_bytes_be())
    }

    /// Ingest the peer's public key and numbered id.
    ///
    /// Accepted at most once. On success the encryption key, nonce and
    /// both key-confirmation digests are computed and frozen.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyInitialized`] on a second call; no state changes.
    /// - [`Error::PeerKeyInvalid`] if `remote_id` is empty, or the key is
    ///   outside `(1, p - 1)`, or it equals the generator. Such values
    ///   would let an attacker force the exchange into a trivial subgroup.
    pub fn provide_remote_pair(&mut self, remote_pubkey: &[u8], remote_id: &str) -> Result<()> {
        if self.remote.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        if remote_id.is_empty() {
            return Err(Error::PeerKeyInvalid("peer id is empty".into()));
        }

        let one = BigUint::from(1u32);
        let p_minus_one = &self.p - &one;
        let remote_pubkey = BigUint::from_bytes_be(remote_pubkey);

        if remote_pubkey <= one || remote_pubkey >= p_minus_one {
            return Err(Error::PeerKeyInvalid(
                "peer public key outside (1, p - 1)".into(),
            ));
        }
        if remote_pubkey == self.generator {
            return Err(Error::PeerKeyInvalid(
                "peer public key equals the generator".into(),
            ));
        }

        let keying_material = self.make_keying_material(remote_id, &remote_pubkey);
        let (encryption_key, nonce) = kdf::derive_key_and_nonce(&keying_material)?;

        // Reversed argument order on the two digests is what makes the
        // confirmation mutual: each side sends its local digest and checks
        // the peer's against the opposite ordering.
        let kcd_local = gen_kcd(
            &encryption_key,
            remote_id,
            &self.id_numbered,
            &remote_pubkey,
            &self.pubkey,
        );
        let kcd_remote = gen_kcd(
            &encryption_key,
            &self.id_numbered,
            remote_id,
            &self.pubkey,
            &remote_pubkey,
        );

        self.remote = Some(RemoteState {
            remote_id_numbered: remote_id.to_string(),
            remote_pubkey,
            encryption_key,
            nonce,
            kcd_local,
            kcd_remote,
        });

        Ok(())
    }

    /// The derived encryption key (`KEY_LEN` bytes).
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] before the remote pair is provided.
    pub fn encryption_key(&self) -> Result<&[u8]> {
        Ok(&self.remote_state("encryption_key")?.encryption_key)
    }

    /// The derived nonce (`NONCE_LEN` bytes).
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] before the remote pair is provided.
    pub fn nonce(&self) -> Result<&[u8]> {
        Ok(&self.remote_state("nonce")?.nonce)
    }

    /// Key-confirmation data to send to the peer.
    ///
    /// The peer verifies it with its own `confirm_key`; a match proves
    /// both sides derived the same encryption key, and therefore share the
    /// password, without revealing the key.
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] before the remote pair is provided.
    pub fn key_confirmation_data(&self) -> Result<&[u8]> {
        Ok(&self.remote_state("key_confirmation_data")?.kcd_local)
    }

    /// Check the key-confirmation data received from the peer.
    ///
    /// Constant-time comparison against the expected remote digest.
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] before the remote pair is provided.
    pub fn confirm_key(&self, remote_kcd: &[u8]) -> Result<bool> {
        let state = self.remote_state("confirm_key")?;
        Ok(bool::from(state.kcd_remote.ct_eq(remote_kcd)))
    }

    /// Sign `message` with HMAC-SHA256 under the derived encryption key.
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] before the remote pair is provided.
    pub fn hmac_sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let state = self.remote_state("hmac_sign")?;
        Ok(hmac_digest(&state.encryption_key, &[message]))
    }

    /// Verify a signature the peer produced with its `hmac_sign`.
    ///
    /// Constant-time comparison.
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] before the remote pair is provided.
    pub fn confirm_hmac(&self, signature: &[u8], message: &[u8]) -> Result<bool> {
        let state = self.remote_state("confirm_hmac")?;
        let expected = hmac_digest(&state.encryption_key, &[message]);
        Ok(bool::from(expected.ct_eq(signature)))
    }

    fn remote_state(&self, operation: &'static str) -> Result<&RemoteState> {
        self.remote
            .as_ref()
            .ok_or(Error::NotInitialized(operation))
    }

    /// Hash ids, public keys and the Diffie-Hellman secret into keying
    /// material. Ids are ordered lexicographically and keys numerically so
    /// both peers hash the identical byte sequence.
    fn make_keying_material(&self, remote_id: &str, remote_pubkey: &BigUint) -> [u8; HASH_LEN] {
        let local_id = self.id_numbered.as_str();
        let (first_id, second_id) = if local_id <= remote_id {
            (local_id, remote_id)
        } else {
            (remote_id, local_id)
        };
        let (first_key, second_key) = if self.pubkey <= *remote_pubkey {
            (&self.pubkey, remote_pubkey)
        } else {
            (remote_pubkey, &self.pubkey)
        };

        let shared_secret = remote_pubkey.modpow(&self.privkey, &self.p);

        let mut hasher = Sha256::new();
        hasher.update(first_id.as_bytes());
        hasher.update(second_id.as_bytes());
        hasher.update(first_key.to_bytes_be());
        hasher.update(second_key.to_bytes_be());
        hasher.update(shared_secret.to_bytes_be());
        hasher.finalize().into()
    }
}

/// `(H(password) mod p)^2 mod p`, rejecting values that collapse the
/// subgroup: 0, 1 and `p - 1`.
fn derive_generator(password: &[u8], p: &BigUint) -> Result<BigUint> {
    let one = BigUint::from(1u32);
    let two = BigUint::from(2u32);

    let hashed = BigUint::from_bytes_be(&Sha256::digest(password)) % p;
    let generator = hashed.modpow(&two, p);

    if generator <= one || generator == p - &one {
        return Err(Error::InvalidGenerator);
    }
    Ok(generator)
}

/// Key-confirmation digest: HMAC over both ids and both public keys in the
/// given order, keyed with the derived encryption key.
fn gen_kcd(
    encryption_key: &[u8],
    first_id: &str,
    second_id: &str,
    first_pubkey: &BigUint,
    second_pubkey: &BigUint,
) -> Vec<u8> {
    hmac_digest(
        encryption_key,
        &[
            first_id.as_bytes(),
            second_id.as_bytes(),
            &first_pubkey.to_bytes_be(),
            &second_pubkey.to_bytes_be(),
        ],
    )
}

fn hmac_digest(key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::{KEY_LEN, NONCE_LEN};

    /// RFC 3526 1536-bit MODP group; `(p - 1) / 2` is prime.
    const MODP_1536: &[u8] = b"ffffffffffffffffc90fdaa22168c234c4c6628b80dc1cd129024\
        e088a67cc74020bbea63b139b22514a08798e3404ddef9519b3cd\
        3a431b302b0a6df25f14374fe1356d6d51c245e485b576625e7ec\
        6f44c42e9a637ed6b0bff5cb6f406b7edee386bfb5a899fa5ae9f\
        24117c4b1fe649286651ece45b3dc2007cb8a163bf0598da48361\
        c55d39a69163fa8fd24cf5f83655d23dca3ad961c62f356208552\
        bb9ed529077096966d670c354e4abc9804f1746c08ca237327fff\
        fffffffffffff";

    fn test_prime() -> BigUint {
        let digits: Vec<u8> = MODP_1536
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        BigUint::parse_bytes(&digits, 16).unwrap()
    }

    fn engine(id: &str, password: &[u8]) -> SpekeEngine {
        SpekeEngine::new(id, password, test_prime()).unwrap()
    }

    fn paired_engines() -> (SpekeEngine, SpekeEngine) {
        let mut alice = engine("alice", b"hunter2");
        let mut bob = engine("bob", b"hunter2");

        let bob_pubkey = bob.public_key();
        let bob_id = bob.id().to_string();
        alice.provide_remote_pair(&bob_pubkey, &bob_id).unwrap();
        bob.provide_remote_pair(&alice.public_key(), alice.id())
            .unwrap();

        (alice, bob)
    }

    #[test]
    fn test_empty_id_rejected() {
        let result = SpekeEngine::new("", b"hunter2", test_prime());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_even_modulus_rejected() {
        let result = SpekeEngine::new("alice", b"hunter2", BigUint::from(1024u32));
        assert!(matches!(result, Err(Error::InvalidPrime(_))));
    }

    #[test]
    fn test_tiny_modulus_rejected() {
        // With p = 3 every squared hash lands on 0 or 1, so the generator
        // check must fire for any password.
        let result = SpekeEngine::new("alice", b"hunter2", BigUint::from(3u32));
        assert!(matches!(
            result,
            Err(Error::InvalidGenerator) | Err(Error::InvalidPrime(_))
        ));
    }

    #[test]
    fn test_peers_derive_identical_material() {
        let (alice, bob) = paired_engines();

        assert_eq!(alice.encryption_key().unwrap(), bob.encryption_key().unwrap());
        assert_eq!(alice.nonce().unwrap(), bob.nonce().unwrap());
        assert_eq!(alice.encryption_key().unwrap().len(), KEY_LEN);
        assert_eq!(alice.nonce().unwrap().len(), NONCE_LEN);
    }

    #[test]
    fn test_key_confirmation_is_mutual() {
        let (alice, bob) = paired_engines();

        let alice_kcd = alice.key_confirmation_data().unwrap();
        let bob_kcd = bob.key_confirmation_data().unwrap();

        assert!(alice.confirm_key(bob_kcd).unwrap());
        assert!(bob.confirm_key(alice_kcd).unwrap());

        // The two digests cover the same material in opposite order, so
        // they must differ while still cross-verifying.
        assert_ne!(alice_kcd, bob_kcd);
        assert!(!alice.confirm_key(alice_kcd).unwrap());
    }

    #[test]
    fn test_wrong_password_fails_confirmation() {
        let mut alice = engine("alice", b"hunter2");
        let mut bob = engine("bob", b"hunter3");

        let bob_pubkey = bob.public_key();
        let bob_id = bob.id().to_string();
        alice.provide_remote_pair(&bob_pubkey, &bob_id).unwrap();
        bob.provide_remote_pair(&alice.public_key(), alice.id())
            .unwrap();

        assert!(!alice
            .confirm_key(bob.key_confirmation_data().unwrap())
            .unwrap());
        assert!(!bob
            .confirm_key(alice.key_confirmation_data().unwrap())
            .unwrap());
    }

    #[test]
    fn test_trivial_remote_keys_rejected() {
        let p = test_prime();
        let one = BigUint::from(1u32);

        let mut candidates = vec![
            BigUint::from(0u32).to_bytes_be(),
            BigUint::from(1u32).to_bytes_be(),
            (&p - &one).to_bytes_be(),
            p.to_bytes_be(),
        ];
        // The generator is deterministic per (password, p), so a second
        // engine with the same inputs reproduces it.
        let twin = engine("mallory", b"hunter2");
        candidates.push(twin.generator.to_bytes_be());

        for candidate in candidates {
            let mut alice = engine("alice", b"hunter2");
            let result = alice.provide_remote_pair(&candidate, "mallory-1");
            assert!(
                matches!(result, Err(Error::PeerKeyInvalid(_))),
                "key {:?} must be rejected",
                candidate
            );
            assert!(!alice.is_initialized());
        }
    }

    #[test]
    fn test_empty_remote_id_rejected() {
        let mut alice = engine("alice", b"hunter2");
        let bob = engine("bob", b"hunter2");

        let result = alice.provide_remote_pair(&bob.public_key(), "");
        assert!(matches!(result, Err(Error::PeerKeyInvalid(_))));
    }

    #[test]
    fn test_remote_pair_accepted_once() {
        let (mut alice, bob) = paired_engines();

        let key_before = alice.encryption_key().unwrap().to_vec();
        let kcd_before = alice.key_confirmation_data().unwrap().to_vec();

        let result = alice.provide_remote_pair(&bob.public_key(), bob.id());
        assert!(matches!(result, Err(Error::AlreadyInitialized)));

        assert_eq!(alice.encryption_key().unwrap(), key_before.as_slice());
        assert_eq!(alice.key_confirmation_data().unwrap(), kcd_before.as_slice());
    }

    #[test]
    fn test_operations_require_initialization() {
        let alice = engine("alice", b"hunter2");

        assert!(matches!(
            alice.encryption_key(),
            Err(Error::NotInitialized(_))
        ));
        assert!(matches!(alice.nonce(), Err(Error::NotInitialized(_))));
        assert!(matches!(
            alice.key_confirmation_data(),
            Err(Error::NotInitialized(_))
        ));
        assert!(matches!(
            alice.confirm_key(&[0u8; 32]),
            Err(Error::NotInitialized(_))
        ));
        assert!(matches!(
            alice.hmac_sign(b"message"),
            Err(Error::NotInitialized(_))
        ));
        assert!(matches!(
            alice.confirm_hmac(&[0u8; 32], b"message"),
            Err(Error::NotInitialized(_))
        ));
    }

    #[test]
    fn test_hmac_sign_and_confirm() {
        let (alice, bob) = paired_engines();

        let message = b"attack at dawn";
        let signature = alice.hmac_sign(message).unwrap();

        assert!(bob.confirm_hmac(&signature, message).unwrap());
        assert!(alice.confirm_hmac(&signature, message).unwrap());

        assert!(!bob.confirm_hmac(&signature, b"attack at dusk").unwrap());

        let mut tampered = signature.clone();
        tampered[0] ^= 0x01;
        assert!(!bob.confirm_hmac(&tampered, message).unwrap());

        // A truncated signature must fail, not panic.
        assert!(!bob.confirm_hmac(&signature[..16], message).unwrap());
    }

    #[test]
    fn test_confirm_key_wrong_length() {
        let (alice, _bob) = paired_engines();
        assert!(!alice.confirm_key(&[]).unwrap());
        assert!(!alice.confirm_key(&[0u8; 16]).unwrap());
    }

    #[test]
    fn test_public_key_in_group_range() {
        let alice = engine("alice", b"hunter2");
        let pubkey = BigUint::from_bytes_be(&alice.public_key());
        let one = BigUint::from(1u32);

        assert!(pubkey > one);
        assert!(pubkey < test_prime() - &one);
    }

    #[test]
    fn test_concurrent_constructions_get_distinct_ids() {
        let prime = test_prime();

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let prime = prime.clone();
                std::thread::spawn(move || {
                    SpekeEngine::new("alice", b"hunter2", prime)
                        .unwrap()
                        .id()
                        .to_string()
                })
            })
            .collect();

        let mut ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 100, "all 100 numbered ids must be distinct");
    }

    #[test]
    fn test_remote_pair_recorded_as_provided() {
        let (alice, bob) = paired_engines();

        assert_eq!(alice.remote_id().unwrap(), bob.id());
        assert_eq!(alice.remote_public_key().unwrap(), bob.public_key());

        let fresh = engine("carol", b"hunter2");
        assert!(matches!(fresh.remote_id(), Err(Error::NotInitialized(_))));
    }
}
