// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// COSIG - CONSENSUS SESSION ENGINE
//
// Committee-based collective signing in two rounds of
// Announce → Commit → Challenge → Response → CollectiveSig.
// Transport, payload semantics and committee selection live elsewhere:
// roles consume raw bytes and hand back `OutboundMessage`s.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod aggregator;
pub mod backup;
pub mod bitmap;
pub mod committee;
pub mod config;
pub mod error;
pub mod gate;
pub mod leader;
pub mod message;
pub mod role;
pub mod session;
pub mod snapshot;
pub mod state;

pub use aggregator::{Admission, Contributions, RoundArtifact};
pub use backup::{ConsensusBackup, PayloadValidator};
pub use bitmap::{ParticipationBitmap, QuorumBitmap};
pub use committee::{Committee, CommitteeMember, Peer};
pub use config::ConsensusConfig;
pub use error::{ConsensusError, Result};
pub use gate::{Admitted, GateRejection, MessageGate};
pub use leader::ConsensusLeader;
pub use message::{ConsensusMessageType, Round, TYPE_OFFSET};
pub use role::{ConsensusRole, OutboundMessage};
pub use session::{num_for_consensus, ConsensusSession, SessionParams};
pub use snapshot::{SessionSnapshot, SnapshotStore};
pub use state::{ConsensusErrorCode, State, StateObserver};
