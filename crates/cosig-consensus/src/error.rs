use cosig_crypto::CryptoError;

use crate::state::State;

/// Errors surfaced across the consensus crate's fallible APIs.
///
/// Expected protocol outcomes (bad signature, quorum not yet met, foreign
/// message) are NOT errors; they come back as `bool` / `Option` results.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("Committee must have at least one member")]
    EmptyCommittee,

    #[error("Committee of {0} members exceeds the 16-bit peer index space")]
    CommitteeTooLarge(usize),

    #[error("Duplicate public key in committee at index {index}")]
    DuplicateMember { index: usize },

    #[error("Invalid public key in committee at index {index}")]
    InvalidMember { index: usize },

    #[error("Own index {my_id} does not hold this node's public key")]
    KeyMismatch { my_id: u16 },

    #[error("Consensus ID mismatch: session {expected}, snapshot {found}")]
    ConsensusIdMismatch { expected: u32, found: u32 },

    #[error("Snapshot inconsistent with state {state}: {reason}")]
    InconsistentSnapshot { state: State, reason: String },

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Config encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Stored snapshot {consensus_id} failed its integrity check")]
    CorruptSnapshot { consensus_id: u32 },

    #[error("Snapshot store lock acquisition timed out")]
    StoreLocked,
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
