// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// COSIG - SCHNORR MULTI-SIGNATURE PRIMITIVES
//
// Interactive collective signing in three moves:
// 1. each signer i draws a secret k_i and publishes the commit K_i = k_i*G
// 2. everyone derives c = H(sum K_i || sum P_i || m)
// 3. each signer answers s_i = k_i - c*x_i; the collective signature is
//    (c, sum s_i) and verifies against sum P_i like a single signature
//
// All aggregations are sums in a prime-order group, so the result does not
// depend on the order contributions arrived in.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{challenge_scalar, CryptoError, PrivKey, PubKey, Signature, POINT_LEN};

/// Ephemeral per-round secret. Never serialized; zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct CommitSecret {
    scalar: Scalar,
}

impl CommitSecret {
    pub fn new() -> Self {
        Self {
            scalar: Scalar::random(&mut OsRng),
        }
    }

    pub fn commit_point(&self) -> CommitPoint {
        CommitPoint(RistrettoPoint::mul_base(&self.scalar).compress())
    }
}

impl Default for CommitSecret {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommitSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("CommitSecret(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitPoint(CompressedRistretto);

impl CommitPoint {
    pub fn to_bytes(&self) -> [u8; POINT_LEN] {
        self.0.to_bytes()
    }

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

    /// Deserialization only checks length; a commit received from a peer
    /// must also decode to a group element before it is aggregated.
    pub fn is_valid(&self) -> bool {
        self.0.decompress().is_some()
    }

    fn point(&self) -> Result<RistrettoPoint, CryptoError> {
        self.0.decompress().ok_or(CryptoError::InvalidPoint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge(Scalar);

impl Challenge {
    pub fn to_bytes(&self) -> [u8; POINT_LEN] {
        self.0.to_bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response(Scalar);

impl Response {
    pub fn to_bytes(&self) -> [u8; POINT_LEN] {
        self.0.to_bytes()
    }
}

/// Sum of public keys. Fails on an empty set or an undecodable key.
pub fn aggregate_keys(keys: &[PubKey]) -> Result<PubKey, CryptoError> {
    if keys.is_empty() {
        return Err(CryptoError::EmptyAggregation);
    }
    let sum = keys
        .iter()
        .map(PubKey::point)
        .sum::<Result<RistrettoPoint, CryptoError>>()?;
    Ok(PubKey(sum.compress()))
}

/// Sum of commit points.
pub fn aggregate_commits(commits: &[CommitPoint]) -> Result<CommitPoint, CryptoError> {
    if commits.is_empty() {
        return Err(CryptoError::EmptyAggregation);
    }
    let sum = commits
        .iter()
        .map(CommitPoint::point)
        .sum::<Result<RistrettoPoint, CryptoError>>()?;
    Ok(CommitPoint(sum.compress()))
}

/// Sum of response scalars.
pub fn aggregate_responses(responses: &[Response]) -> Result<Response, CryptoError> {
    if responses.is_empty() {
        return Err(CryptoError::EmptyAggregation);
    }
    Ok(Response(responses.iter().map(|r| r.0).sum()))
}

/// c = H(aggregated commit || aggregated key || message).
pub fn derive_challenge(
    message: &[u8],
    aggregated_commit: &CommitPoint,
    aggregated_key: &PubKey,
) -> Challenge {
    Challenge(challenge_scalar(
        message,
        &aggregated_commit.0,
        &aggregated_key.0,
    ))
}

/// s_i = k_i - c*x_i
pub fn compute_response(secret: &CommitSecret, challenge: &Challenge, key: &PrivKey) -> Response {
    Response(secret.scalar - challenge.0 * key.scalar())
}

/// Check one signer's partial response: s_i*G + c*P_i must equal K_i.
pub fn verify_response(
    response: &Response,
    challenge: &Challenge,
    public_key: &PubKey,
    commit: &CommitPoint,
) -> bool {
    let (point, expected) = match (public_key.point(), commit.point()) {
        (Ok(p), Ok(k)) => (p, k),
        _ => return false,
    };
    RistrettoPoint::vartime_double_scalar_mul_basepoint(&challenge.0, &point, &response.0)
        == expected
}

/// Collective signature from the challenge and the aggregated response.
pub fn aggregate_sign(challenge: &Challenge, aggregated_response: &Response) -> Signature {
    Signature {
        challenge: challenge.0,
        response: aggregated_response.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{verify, KeyPair};

    fn committee(n: u8) -> Vec<KeyPair> {
        (0..n).map(|i| KeyPair::from_seed(&[i + 1; 32])).collect()
    }

    #[test]
    fn test_collective_signature_verifies_against_aggregated_key() {
        let message = b"block 42";
        let keys = committee(4);
        let secrets: Vec<CommitSecret> = keys.iter().map(|_| CommitSecret::new()).collect();
        let commits: Vec<CommitPoint> = secrets.iter().map(|s| s.commit_point()).collect();
        let pubkeys: Vec<PubKey> = keys.iter().map(|k| k.public_key).collect();

        let agg_commit = aggregate_commits(&commits).unwrap();
        let agg_key = aggregate_keys(&pubkeys).unwrap();
        let challenge = derive_challenge(message, &agg_commit, &agg_key);

        let responses: Vec<Response> = secrets
            .iter()
            .zip(&keys)
            .map(|(s, k)| compute_response(s, &challenge, &k.private_key))
            .collect();
        for ((r, k), c) in responses.iter().zip(&keys).zip(&commits) {
            assert!(verify_response(r, &challenge, &k.public_key, c));
        }

        let agg_response = aggregate_responses(&responses).unwrap();
        let sig = aggregate_sign(&challenge, &agg_response);
        assert!(verify(message, &sig, &agg_key));
        assert!(!verify(b"block 43", &sig, &agg_key));
    }

    #[test]
    fn test_partial_response_from_wrong_key_rejected() {
        let keys = committee(2);
        let secret = CommitSecret::new();
        let commit = secret.commit_point();
        let agg_key = aggregate_keys(&[keys[0].public_key]).unwrap();
        let challenge = derive_challenge(b"m", &commit, &agg_key);
        let response = compute_response(&secret, &challenge, &keys[1].private_key);
        assert!(!verify_response(
            &response,
            &challenge,
            &keys[0].public_key,
            &commit
        ));
    }

    #[test]
    fn test_aggregation_order_independent() {
        let keys = committee(3);
        let forward: Vec<PubKey> = keys.iter().map(|k| k.public_key).collect();
        let shuffled = vec![forward[2], forward[0], forward[1]];
        assert_eq!(
            aggregate_keys(&forward).unwrap(),
            aggregate_keys(&shuffled).unwrap()
        );
    }

    #[test]
    fn test_empty_aggregation_rejected() {
        assert_eq!(aggregate_keys(&[]), Err(CryptoError::EmptyAggregation));
        assert_eq!(aggregate_commits(&[]), Err(CryptoError::EmptyAggregation));
        assert_eq!(aggregate_responses(&[]), Err(CryptoError::EmptyAggregation));
    }

    #[test]
    fn test_challenge_is_deterministic() {
        let commit = CommitSecret::new().commit_point();
        let key = committee(1)[0].public_key;
        assert_eq!(
            derive_challenge(b"x", &commit, &key),
            derive_challenge(b"x", &commit, &key)
        );
        assert_ne!(
            derive_challenge(b"x", &commit, &key),
            derive_challenge(b"y", &commit, &key)
        );
    }
}
