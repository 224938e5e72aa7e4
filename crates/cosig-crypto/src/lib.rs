// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// COSIG - CRYPTOGRAPHY MODULE
//
// Schnorr signatures over the Ristretto255 prime-order group.
// - Key generation (random and deterministic from a 32-byte seed)
// - Deterministic message signing and verification
// - Multi-signature primitives (see `multisig`): commit, challenge,
//   response, and their aggregation into one collective signature
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod multisig;

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use digest::Digest;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use multisig::{
    aggregate_commits, aggregate_keys, aggregate_responses, aggregate_sign, compute_response,
    derive_challenge, verify_response, Challenge, CommitPoint, CommitSecret, Response,
};

/// Serialized length of a public key, commit point, challenge or response.
pub const POINT_LEN: usize = 32;

/// Serialized length of a signature: challenge || response.
pub const SIGNATURE_LEN: usize = 64;

// Domain separation tags for every hash-to-scalar use.
const NONCE_TAG: &[u8] = b"cosig-schnorr-nonce-v1";
const CHALLENGE_TAG: &[u8] = b"cosig-schnorr-challenge-v1";
const KEYGEN_TAG: &[u8] = b"cosig-schnorr-keygen-v1";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid key format")]
    InvalidKey,
    #[error("Bytes do not encode a valid group element")]
    InvalidPoint,
    #[error("Bytes do not encode a canonical scalar")]
    InvalidScalar,
    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Nothing to aggregate")]
    EmptyAggregation,
}

/// Private signing key. Zeroized from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivKey {
    scalar: Scalar,
}

impl PrivKey {
    /// Parse a canonical 32-byte scalar. Zero is not a valid key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let scalar = scalar_from_slice(bytes).map_err(|_| CryptoError::InvalidKey)?;
        if scalar == Scalar::ZERO {
            return Err(CryptoError::InvalidKey);
        }
        Ok(Self { scalar })
    }

    pub fn to_bytes(&self) -> [u8; POINT_LEN] {
        self.scalar.to_bytes()
    }

    pub fn public_key(&self) -> PubKey {
        PubKey(RistrettoPoint::mul_base(&self.scalar).compress())
    }

    pub(crate) fn scalar(&self) -> &Scalar {
        &self.scalar
    }
}

impl std::fmt::Debug for PrivKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("PrivKey(<redacted>)")
    }
}

/// Public key: a compressed Ristretto point.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PubKey(pub(crate) CompressedRistretto);

impl PubKey {
    /// Parse 32 bytes and check they decode to a group element.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let compressed = CompressedRistretto::from_slice(bytes).map_err(|_| {
            CryptoError::InvalidLength {
                expected: POINT_LEN,
                actual: bytes.len(),
            }
        })?;
        compressed.decompress().ok_or(CryptoError::InvalidPoint)?;
        Ok(Self(compressed))
    }

    pub fn to_bytes(&self) -> [u8; POINT_LEN] {
        self.0.to_bytes()
    }

    pub fn is_valid(&self) -> bool {
        self.0.decompress().is_some()
    }

    pub(crate) fn point(&self) -> Result<RistrettoPoint, CryptoError> {
        self.0.decompress().ok_or(CryptoError::InvalidPoint)
    }
}

impl std::fmt::Debug for PubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "PubKey({})", hex::encode(&self.0.as_bytes()[..8]))
    }
}

impl std::fmt::Display for PubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0.as_bytes()))
    }
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: PrivKey,
    pub public_key: PubKey,
}

impl KeyPair {
    /// Generate a new random key pair from the OS RNG.
    pub fn generate() -> Self {
        let scalar = Scalar::random(&mut OsRng);
        Self::from_private(PrivKey { scalar })
    }

    /// Derive a key pair DETERMINISTICALLY from a seed.
    ///
    /// scalar = SHA-512(tag || seed) mod l. Same seed always yields the same
    /// key pair, which keeps committee fixtures reproducible.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let mut scalar = hash_to_scalar(&[KEYGEN_TAG, seed]);
        if scalar == Scalar::ZERO {
            scalar = Scalar::ONE;
        }
        Self::from_private(PrivKey { scalar })
    }

    pub fn from_private(private_key: PrivKey) -> Self {
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }
}

/// Schnorr signature as the (challenge, response) scalar pair.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub(crate) challenge: Scalar,
    pub(crate) response: Scalar,
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut out = [0u8; SIGNATURE_LEN];
        out[..POINT_LEN].copy_from_slice(self.challenge.as_bytes());
        out[POINT_LEN..].copy_from_slice(self.response.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SIGNATURE_LEN {
            return Err(CryptoError::InvalidLength {
                expected: SIGNATURE_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            challenge: scalar_from_slice(&bytes[..POINT_LEN])?,
            response: scalar_from_slice(&bytes[POINT_LEN..])?,
        })
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self {
            challenge: Scalar::ZERO,
            response: Scalar::ZERO,
        }
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.to_bytes()[..8]))
    }
}

/// Sign a message. The nonce is derived from (key, message) so the same
/// inputs always produce the same signature.
pub fn sign(message: &[u8], key: &PrivKey) -> Signature {
    let public = key.public_key();
    let mut nonce = hash_to_scalar(&[NONCE_TAG, key.scalar.as_bytes(), message]);
    let commitment = RistrettoPoint::mul_base(&nonce).compress();
    let challenge = challenge_scalar(message, &commitment, &public.0);
    let response = nonce - challenge * key.scalar;
    nonce.zeroize();
    Signature {
        challenge,
        response,
    }
}

/// Verify a signature. Returns false for any malformed input; a mismatch is
/// an expected outcome, not an error.
pub fn verify(message: &[u8], signature: &Signature, public_key: &PubKey) -> bool {
    let point = match public_key.point() {
        Ok(p) => p,
        Err(_) => return false,
    };
    // R' = c*P + s*G
    let recovered = RistrettoPoint::vartime_double_scalar_mul_basepoint(
        &signature.challenge,
        &point,
        &signature.response,
    );
    challenge_scalar(message, &recovered.compress(), &public_key.0) == signature.challenge
}

/// H(tag || R || P || m) reduced to a scalar. Shared by single signatures and
/// multi-signature challenge derivation so collective signatures verify with
/// plain `verify` against the aggregated key.
pub(crate) fn challenge_scalar(
    message: &[u8],
    commitment: &CompressedRistretto,
    public_key: &CompressedRistretto,
) -> Scalar {
    hash_to_scalar(&[
        CHALLENGE_TAG,
        commitment.as_bytes(),
        public_key.as_bytes(),
        message,
    ])
}

fn hash_to_scalar(parts: &[&[u8]]) -> Scalar {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    let scalar = Scalar::from_bytes_mod_order_wide(&wide);
    wide.zeroize();
    scalar
}

pub(crate) fn scalar_from_slice(bytes: &[u8]) -> Result<Scalar, CryptoError> {
    let arr: [u8; POINT_LEN] = bytes.try_into().map_err(|_| CryptoError::InvalidLength {
        expected: POINT_LEN,
        actual: bytes.len(),
    })?;
    Option::<Scalar>::from(Scalar::from_canonical_bytes(arr)).ok_or(CryptoError::InvalidScalar)
}
