// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// COSIG - SESSION STATE & ERROR CODES
//
// Normal round:  INITIAL → ANNOUNCE_DONE → COMMIT_DONE → CHALLENGE_DONE
//                → RESPONSE_DONE → COLLECTIVESIG_DONE
// Final round:   → FINALCOMMIT_DONE → FINALCHALLENGE_DONE
//                → FINALRESPONSE_DONE → DONE
// ERROR is reachable from every non-terminal state. DONE and ERROR are
// terminal. The only other way to move is an explicit recovery overwrite.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// State of the active consensus session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum State {
    Initial = 0x00,
    AnnounceDone,
    CommitDone,
    ChallengeDone,
    ResponseDone,
    CollectiveSigDone,
    FinalCommitDone,
    FinalChallengeDone,
    FinalResponseDone,
    Done,
    Error,
}

impl State {
    pub const ALL: [State; 11] = [
        State::Initial,
        State::AnnounceDone,
        State::CommitDone,
        State::ChallengeDone,
        State::ResponseDone,
        State::CollectiveSigDone,
        State::FinalCommitDone,
        State::FinalChallengeDone,
        State::FinalResponseDone,
        State::Done,
        State::Error,
    ];

    pub fn from_u8(value: u8) -> Option<State> {
        State::ALL.get(value as usize).copied()
    }

    /// Next state in the forward chain. None for DONE and ERROR.
    pub fn successor(self) -> Option<State> {
        match self {
            State::Done | State::Error => None,
            other => State::from_u8(other as u8 + 1),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, State::Done | State::Error)
    }

    /// Whether `next` is a legal regular transition from `self`.
    pub fn can_transition_to(self, next: State) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == State::Error || self.successor() == Some(next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Initial => "INITIAL",
            State::AnnounceDone => "ANNOUNCE_DONE",
            State::CommitDone => "COMMIT_DONE",
            State::ChallengeDone => "CHALLENGE_DONE",
            State::ResponseDone => "RESPONSE_DONE",
            State::CollectiveSigDone => "COLLECTIVESIG_DONE",
            State::FinalCommitDone => "FINALCOMMIT_DONE",
            State::FinalChallengeDone => "FINALCHALLENGE_DONE",
            State::FinalResponseDone => "FINALRESPONSE_DONE",
            State::Done => "DONE",
            State::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomically updatable session state.
///
/// The owning thread drives transitions; any number of `StateObserver`s may
/// read concurrently.
#[derive(Debug)]
pub(crate) struct AtomicState(Arc<AtomicU8>);

impl AtomicState {
    pub(crate) fn new(state: State) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub(crate) fn load(&self) -> State {
        decode(self.0.load(Ordering::Acquire))
    }

    /// Apply a forward transition. On success returns the previous state;
    /// on failure returns the current state unchanged.
    pub(crate) fn transition(&self, next: State) -> Result<State, State> {
        let mut current = self.load();
        loop {
            if !current.can_transition_to(next) {
                return Err(current);
            }
            match self.0.compare_exchange(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current),
                Err(actual) => current = decode(actual),
            }
        }
    }

    /// Unconditional overwrite, used only by recovery.
    pub(crate) fn force(&self, state: State) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub(crate) fn observer(&self) -> StateObserver {
        StateObserver(Arc::clone(&self.0))
    }
}

fn decode(raw: u8) -> State {
    // Only `State as u8` values are ever stored.
    State::from_u8(raw).unwrap_or(State::Error)
}

/// Read-only handle for polling a session's state from another thread
/// (timeout supervisors, health checks).
#[derive(Debug, Clone)]
pub struct StateObserver(Arc<AtomicU8>);

impl StateObserver {
    pub fn state(&self) -> State {
        decode(self.0.load(Ordering::Acquire))
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

/// Reasons a payload failed validation. Numeric values are stable across
/// versions so peers and logs can correlate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u16)]
pub enum ConsensusErrorCode {
    #[default]
    NoError = 0x00,
    GenericError,
    InvalidDsBlock,
    InvalidMicroblock,
    InvalidFinalBlock,
    InvalidViewChangeBlock,
    InvalidDsBlockVersion,
    InvalidMicroblockVersion,
    InvalidFinalBlockVersion,
    InvalidFinalBlockNumber,
    InvalidPrevFinalBlockHash,
    InvalidViewChangeBlockVersion,
    InvalidTimestamp,
    InvalidBlockHash,
    InvalidMicroblockRootHash,
    MissingTxn,
    WrongTxnOrder,
    WrongGasUsed,
    WrongRewards,
    FinalBlockMissingMicroblocks,
    FinalBlockInvalidMicroblockRootHash,
    FinalBlockMicroblockEmptyError,
    FinalBlockMbsLegitimacyError,
    InvalidDsMicroblock,
    InvalidMicroblockStateDeltaHash,
    InvalidMicroblockShardId,
    InvalidMicroblockTranReceiptHash,
    InvalidFinalBlockStateRoot,
    InvalidFinalBlockStateDeltaHash,
    InvalidCommHash,
}

/// Human-readable text per code, indexed by the numeric value.
const CONSENSUS_ERROR_MESSAGES: [(ConsensusErrorCode, &str); 30] = [
    (ConsensusErrorCode::NoError, "No error"),
    (ConsensusErrorCode::GenericError, "Generic error"),
    (ConsensusErrorCode::InvalidDsBlock, "Invalid DS block"),
    (ConsensusErrorCode::InvalidMicroblock, "Invalid microblock"),
    (ConsensusErrorCode::InvalidFinalBlock, "Invalid final block"),
    (ConsensusErrorCode::InvalidViewChangeBlock, "Invalid view change block"),
    (ConsensusErrorCode::InvalidDsBlockVersion, "Invalid DS block version"),
    (ConsensusErrorCode::InvalidMicroblockVersion, "Invalid microblock version"),
    (ConsensusErrorCode::InvalidFinalBlockVersion, "Invalid final block version"),
    (ConsensusErrorCode::InvalidFinalBlockNumber, "Invalid final block number"),
    (ConsensusErrorCode::InvalidPrevFinalBlockHash, "Invalid previous final block hash"),
    (ConsensusErrorCode::InvalidViewChangeBlockVersion, "Invalid view change block version"),
    (ConsensusErrorCode::InvalidTimestamp, "Invalid timestamp"),
    (ConsensusErrorCode::InvalidBlockHash, "Invalid block hash"),
    (ConsensusErrorCode::InvalidMicroblockRootHash, "Invalid microblock root hash"),
    (ConsensusErrorCode::MissingTxn, "Missing transactions"),
    (ConsensusErrorCode::WrongTxnOrder, "Wrong transaction order"),
    (ConsensusErrorCode::WrongGasUsed, "Wrong gas used"),
    (ConsensusErrorCode::WrongRewards, "Wrong rewards"),
    (ConsensusErrorCode::FinalBlockMissingMicroblocks, "Final block missing microblocks"),
    (
        ConsensusErrorCode::FinalBlockInvalidMicroblockRootHash,
        "Final block has invalid microblock root hash",
    ),
    (ConsensusErrorCode::FinalBlockMicroblockEmptyError, "Final block microblock empty"),
    (
        ConsensusErrorCode::FinalBlockMbsLegitimacyError,
        "Final block microblocks legitimacy check failed",
    ),
    (ConsensusErrorCode::InvalidDsMicroblock, "Invalid DS microblock"),
    (
        ConsensusErrorCode::InvalidMicroblockStateDeltaHash,
        "Invalid microblock state delta hash",
    ),
    (ConsensusErrorCode::InvalidMicroblockShardId, "Invalid microblock shard ID"),
    (
        ConsensusErrorCode::InvalidMicroblockTranReceiptHash,
        "Invalid microblock transaction receipt hash",
    ),
    (ConsensusErrorCode::InvalidFinalBlockStateRoot, "Invalid final block state root"),
    (
        ConsensusErrorCode::InvalidFinalBlockStateDeltaHash,
        "Invalid final block state delta hash",
    ),
    (ConsensusErrorCode::InvalidCommHash, "Invalid committee hash"),
];

impl ConsensusErrorCode {
    pub fn from_u16(value: u16) -> Option<Self> {
        CONSENSUS_ERROR_MESSAGES
            .get(value as usize)
            .map(|(code, _)| *code)
    }

    pub fn message(self) -> &'static str {
        CONSENSUS_ERROR_MESSAGES[self as usize].1
    }
}

impl std::fmt::Display for ConsensusErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.message())
    }
}
