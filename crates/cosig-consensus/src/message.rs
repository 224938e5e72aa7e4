// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// COSIG - CONSENSUS WIRE FORMAT
//
// [class: u8][ins: u8][type: u8][consensus_id: u32 BE][body][signature: 64]
//
// The body is bincode-encoded and type specific. The trailing signature
// covers every byte before it and is made with the sender's committee key.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use cosig_crypto::{Challenge, CommitPoint, PubKey, Response, Signature, SIGNATURE_LEN};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::bitmap::ParticipationBitmap;
use crate::state::State;

/// Offset of the consensus message type byte (after class and instruction).
pub const TYPE_OFFSET: usize = 2;

/// Length of the consensus ID field.
pub const CONSENSUS_ID_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConsensusMessageType {
    Announce = 0x00,
    Commit = 0x01,
    Challenge = 0x02,
    Response = 0x03,
    CollectiveSig = 0x04,
    FinalCommit = 0x05,
    FinalChallenge = 0x06,
    FinalResponse = 0x07,
    FinalCollectiveSig = 0x08,
    CommitFailure = 0x09,
    ConsensusFailure = 0x10,
}

impl ConsensusMessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        use ConsensusMessageType::*;
        Some(match value {
            0x00 => Announce,
            0x01 => Commit,
            0x02 => Challenge,
            0x03 => Response,
            0x04 => CollectiveSig,
            0x05 => FinalCommit,
            0x06 => FinalChallenge,
            0x07 => FinalResponse,
            0x08 => FinalCollectiveSig,
            0x09 => CommitFailure,
            0x10 => ConsensusFailure,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ConsensusMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Which of the two sub-rounds a message or artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Round {
    Normal,
    Final,
}

impl Round {
    /// Round a session in `state` is working on. Everything from
    /// COLLECTIVESIG_DONE up to DONE belongs to the final round.
    pub fn of_state(state: State) -> Round {
        match state {
            State::Error => Round::Normal,
            s if s >= State::CollectiveSigDone => Round::Final,
            _ => Round::Normal,
        }
    }

    pub fn commit_type(self) -> ConsensusMessageType {
        match self {
            Round::Normal => ConsensusMessageType::Commit,
            Round::Final => ConsensusMessageType::FinalCommit,
        }
    }

    pub fn challenge_type(self) -> ConsensusMessageType {
        match self {
            Round::Normal => ConsensusMessageType::Challenge,
            Round::Final => ConsensusMessageType::FinalChallenge,
        }
    }

    pub fn response_type(self) -> ConsensusMessageType {
        match self {
            Round::Normal => ConsensusMessageType::Response,
            Round::Final => ConsensusMessageType::FinalResponse,
        }
    }

    pub fn collective_sig_type(self) -> ConsensusMessageType {
        match self {
            Round::Normal => ConsensusMessageType::CollectiveSig,
            Round::Final => ConsensusMessageType::FinalCollectiveSig,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// MESSAGE BODIES
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceBody {
    pub leader_id: u16,
    pub block_number: u64,
    pub block_hash: Vec<u8>,
    pub payload: Vec<u8>,
}

/// COMMIT and FINALCOMMIT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitBody {
    pub peer_id: u16,
    pub commit: CommitPoint,
}

/// CHALLENGE and FINALCHALLENGE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeBody {
    pub leader_id: u16,
    pub aggregated_commit: CommitPoint,
    pub aggregated_key: PubKey,
    pub challenge: Challenge,
    pub bitmap: ParticipationBitmap,
}

/// RESPONSE and FINALRESPONSE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub peer_id: u16,
    pub response: Response,
}

/// COLLECTIVESIG and FINALCOLLECTIVESIG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectiveSigBody {
    pub leader_id: u16,
    pub signature: Signature,
    pub bitmap: ParticipationBitmap,
}

/// COMMITFAILURE (backup → leader) and CONSENSUSFAILURE (leader → backups).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureBody {
    pub peer_id: u16,
    pub error_code: u16,
}

/// Identifies the committee member that signed a body.
pub trait Sender {
    fn sender(&self) -> u16;
}

macro_rules! impl_sender {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(impl Sender for $ty {
            fn sender(&self) -> u16 {
                self.$field
            }
        })*
    };
}

impl_sender!(
    AnnounceBody => leader_id,
    CommitBody => peer_id,
    ChallengeBody => leader_id,
    ResponseBody => peer_id,
    CollectiveSigBody => leader_id,
    FailureBody => peer_id,
);

// ─────────────────────────────────────────────────────────────────
// FRAMING
// ─────────────────────────────────────────────────────────────────

/// Serialize header and body. The caller appends the signature.
pub fn frame_unsigned<T: Serialize>(
    class_byte: u8,
    ins_byte: u8,
    msg_type: ConsensusMessageType,
    consensus_id: u32,
    body: &T,
) -> bincode::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    out.push(class_byte);
    out.push(ins_byte);
    out.push(msg_type as u8);
    out.extend_from_slice(&consensus_id.to_be_bytes());
    bincode::serialize_into(&mut out, body)?;
    Ok(out)
}

/// A framed message split into its parts. Nothing here is authenticated yet.
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    pub msg_type: ConsensusMessageType,
    pub consensus_id: u32,
    pub body: &'a [u8],
    /// Byte range covered by the signature, relative to the whole message.
    pub signed_len: usize,
    pub signature: Signature,
}

impl<'a> Envelope<'a> {
    /// Split `message`, where `offset` points at the type byte.
    pub fn parse(message: &'a [u8], offset: usize) -> Option<Self> {
        let id_start = offset.checked_add(1)?;
        let body_start = id_start.checked_add(CONSENSUS_ID_LEN)?;
        let signed_len = message.len().checked_sub(SIGNATURE_LEN)?;
        if signed_len < body_start {
            return None;
        }

        let msg_type = ConsensusMessageType::from_u8(*message.get(offset)?)?;
        let consensus_id = u32::from_be_bytes(message[id_start..body_start].try_into().ok()?);
        let signature = Signature::from_bytes(&message[signed_len..]).ok()?;

        Some(Self {
            msg_type,
            consensus_id,
            body: &message[body_start..signed_len],
            signed_len,
            signature,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        bincode::deserialize(self.body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosig_crypto::{sign, KeyPair};

    #[test]
    fn test_type_codes_are_stable() {
        assert_eq!(ConsensusMessageType::Announce as u8, 0x00);
        assert_eq!(ConsensusMessageType::FinalCollectiveSig as u8, 0x08);
        assert_eq!(ConsensusMessageType::CommitFailure as u8, 0x09);
        assert_eq!(ConsensusMessageType::ConsensusFailure as u8, 0x10);
        assert_eq!(ConsensusMessageType::from_u8(0x0a), None);
        for code in 0x00..=0x09u8 {
            assert_eq!(ConsensusMessageType::from_u8(code).unwrap() as u8, code);
        }
    }

    #[test]
    fn test_round_of_state() {
        assert_eq!(Round::of_state(State::Initial), Round::Normal);
        assert_eq!(Round::of_state(State::ResponseDone), Round::Normal);
        assert_eq!(Round::of_state(State::CollectiveSigDone), Round::Final);
        assert_eq!(Round::of_state(State::FinalCommitDone), Round::Final);
        assert_eq!(Round::of_state(State::Done), Round::Final);
        assert_eq!(Round::of_state(State::Error), Round::Normal);
    }

    #[test]
    fn test_frame_layout() {
        let body = FailureBody {
            peer_id: 3,
            error_code: 0x0f,
        };
        let framed =
            frame_unsigned(0xAA, 0xBB, ConsensusMessageType::CommitFailure, 0x01020304, &body)
                .unwrap();
        assert_eq!(&framed[..7], &[0xAA, 0xBB, 0x09, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_envelope_parse() {
        let kp = KeyPair::from_seed(&[9u8; 32]);
        let body = FailureBody {
            peer_id: 1,
            error_code: 2,
        };
        let mut msg =
            frame_unsigned(1, 2, ConsensusMessageType::CommitFailure, 77, &body).unwrap();
        let sig = sign(&msg, &kp.private_key);
        msg.extend_from_slice(&sig.to_bytes());

        let env = Envelope::parse(&msg, TYPE_OFFSET).unwrap();
        assert_eq!(env.msg_type, ConsensusMessageType::CommitFailure);
        assert_eq!(env.consensus_id, 77);
        assert_eq!(env.signature, sig);
        assert_eq!(env.signed_len, msg.len() - SIGNATURE_LEN);
        assert_eq!(env.decode::<FailureBody>(), Some(body));
    }

    #[test]
    fn test_envelope_rejects_short_and_unknown() {
        assert!(Envelope::parse(&[0u8; 10], TYPE_OFFSET).is_none());
        let mut msg = vec![0u8, 0, 0x42, 0, 0, 0, 1];
        msg.extend_from_slice(&[0u8; SIGNATURE_LEN]);
        assert!(Envelope::parse(&msg, TYPE_OFFSET).is_none(), "unknown type");
    }
}
