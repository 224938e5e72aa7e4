// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// COSIG - SESSION SNAPSHOTS
//
// Persisted progress of a session so a restarted node can resume from a
// known state. Only public data is stored: commit secrets never leave memory.
//
// A snapshot is accepted only if its state and round artifacts agree:
//   state < COLLECTIVESIG_DONE       → no artifacts
//   COLLECTIVESIG_DONE ≤ state < DONE → CS1/B1 only
//   DONE                             → CS1/B1 and CS2/B2
//   ERROR                            → any prefix of the above
// Every artifact present must verify under its bitmap, whatever the state.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use cosig_crypto::{multisig, verify};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use crate::aggregator::RoundArtifact;
use crate::bitmap::ParticipationBitmap;
use crate::committee::Committee;
use crate::error::{ConsensusError, Result};
use crate::session::{final_round_message, num_for_consensus};
use crate::state::{ConsensusErrorCode, State};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub consensus_id: u32,
    pub block_number: u64,
    pub block_hash: Vec<u8>,
    pub payload: Vec<u8>,
    pub state: State,
    pub error_code: ConsensusErrorCode,
    pub round1: Option<RoundArtifact>,
    pub round2: Option<RoundArtifact>,
    /// Bitmap of a challenge answered but not yet closed by its
    /// collective signature.
    pub challenge: Option<ParticipationBitmap>,
}

impl SessionSnapshot {
    pub fn check_consistency(&self, committee: &Committee) -> Result<()> {
        if self.state != State::Error {
            self.check_artifacts_present()?;
        } else if self.round2.is_some() && self.round1.is_none() {
            return Err(self.inconsistent("CS2/B2 without CS1/B1"));
        }

        if let Some(round1) = &self.round1 {
            self.check_artifact(committee, round1, &self.payload, "CS1")?;
            if let Some(round2) = &self.round2 {
                let message = final_round_message(&self.payload, round1);
                self.check_artifact(committee, round2, &message, "CS2")?;
            }
        }

        if let Some(bitmap) = &self.challenge {
            let answering = matches!(
                self.state,
                State::ChallengeDone
                    | State::ResponseDone
                    | State::FinalChallengeDone
                    | State::FinalResponseDone
                    | State::Error
            );
            if !answering {
                return Err(self.inconsistent("pending challenge outside a response phase"));
            }
            self.check_bitmap(committee, bitmap, "challenge")?;
        }
        Ok(())
    }

    fn check_artifacts_present(&self) -> Result<()> {
        let (need_round1, need_round2) = match self.state {
            State::Done => (true, true),
            s if s >= State::CollectiveSigDone => (true, false),
            _ => (false, false),
        };
        if self.round1.is_some() != need_round1 {
            return Err(self.inconsistent(if need_round1 {
                "missing CS1/B1"
            } else {
                "CS1/B1 present before collective signing"
            }));
        }
        if self.round2.is_some() != need_round2 {
            return Err(self.inconsistent(if need_round2 {
                "missing CS2/B2"
            } else {
                "CS2/B2 present before final collective signing"
            }));
        }
        Ok(())
    }

    fn check_bitmap(
        &self,
        committee: &Committee,
        bitmap: &ParticipationBitmap,
        label: &str,
    ) -> Result<()> {
        let quorum = num_for_consensus(committee.len());
        if bitmap.len() != committee.len() {
            return Err(self.inconsistent(&format!(
                "{} bitmap covers {} members, committee has {}",
                label,
                bitmap.len(),
                committee.len()
            )));
        }
        if bitmap.count() < quorum {
            return Err(self.inconsistent(&format!(
                "{} bitmap below quorum ({} < {})",
                label,
                bitmap.count(),
                quorum
            )));
        }
        Ok(())
    }

    fn check_artifact(
        &self,
        committee: &Committee,
        artifact: &RoundArtifact,
        message: &[u8],
        label: &str,
    ) -> Result<()> {
        self.check_bitmap(committee, &artifact.bitmap, label)?;
        let aggregated_key =
            multisig::aggregate_keys(&committee.public_keys_for(&artifact.bitmap))?;
        if !verify(message, &artifact.signature, &aggregated_key) {
            return Err(self.inconsistent(&format!("{} does not verify", label)));
        }
        Ok(())
    }

    fn inconsistent(&self, reason: &str) -> ConsensusError {
        ConsensusError::InconsistentSnapshot {
            state: self.state,
            reason: reason.to_string(),
        }
    }
}

/// Record as stored: snapshot bytes plus their SHA3-256 digest.
#[derive(Serialize, Deserialize)]
struct StoredSnapshot {
    digest: [u8; 32],
    body: Vec<u8>,
}

const KEY_PREFIX: &str = "snapshot_";

/// Waits between attempts when another process still holds the store.
const LOCK_BACKOFF: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_millis(1000),
    Duration::from_millis(2000),
];

fn key_for(consensus_id: u32) -> String {
    // Zero padded so sled's byte order is numeric order.
    format!("{}{:010}", KEY_PREFIX, consensus_id)
}

/// Snapshot persistence over sled.
pub struct SnapshotStore {
    db: sled::Db,
}

impl SnapshotStore {
    /// Open the store at `db_path`, backing off while the directory lock is
    /// held elsewhere. Gives up with `StoreLocked`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let mut backoff = LOCK_BACKOFF.iter();
        loop {
            match sled::open(path) {
                Ok(db) => {
                    info!("Snapshot store opened at {}", path.display());
                    return Ok(Self { db });
                }
                Err(e) if is_lock_contention(&e) => {
                    let Some(delay) = backoff.next() else {
                        return Err(ConsensusError::StoreLocked);
                    };
                    debug!("Snapshot store at {} busy, waiting {:?}", path.display(), delay);
                    std::thread::sleep(*delay);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn store(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let body = bincode::serialize(snapshot)?;
        let record = StoredSnapshot {
            digest: Sha3_256::digest(&body).into(),
            body,
        };
        self.db.insert(
            key_for(snapshot.consensus_id).as_bytes(),
            bincode::serialize(&record)?,
        )?;
        self.db.flush()?;
        Ok(())
    }

    pub fn load(&self, consensus_id: u32) -> Result<Option<SessionSnapshot>> {
        match self.db.get(key_for(consensus_id).as_bytes())? {
            Some(bytes) => decode_record(&bytes, consensus_id).map(Some),
            None => Ok(None),
        }
    }

    /// Snapshot with the highest consensus ID.
    pub fn latest(&self) -> Result<Option<SessionSnapshot>> {
        match self.db.scan_prefix(KEY_PREFIX.as_bytes()).next_back() {
            Some(item) => {
                let (key, value) = item?;
                let consensus_id = parse_key(&key).unwrap_or_default();
                decode_record(&value, consensus_id).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn remove(&self, consensus_id: u32) -> Result<bool> {
        let removed = self.db.remove(key_for(consensus_id).as_bytes())?.is_some();
        self.db.flush()?;
        Ok(removed)
    }

    /// Keep the `keep_last` most recent snapshots, remove the rest.
    pub fn prune(&self, keep_last: usize) -> Result<usize> {
        let keys = self
            .db
            .scan_prefix(KEY_PREFIX.as_bytes())
            .keys()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if keys.len() <= keep_last {
            return Ok(0);
        }

        let to_remove = keys.len() - keep_last;
        for key in keys.iter().take(to_remove) {
            self.db.remove(key)?;
        }
        self.db.flush()?;
        Ok(to_remove)
    }

    pub fn count(&self) -> usize {
        self.db.scan_prefix(KEY_PREFIX.as_bytes()).count()
    }
}

fn decode_record(bytes: &[u8], consensus_id: u32) -> Result<SessionSnapshot> {
    let record: StoredSnapshot = bincode::deserialize(bytes)?;
    let digest: [u8; 32] = Sha3_256::digest(&record.body).into();
    if digest != record.digest {
        return Err(ConsensusError::CorruptSnapshot { consensus_id });
    }
    Ok(bincode::deserialize(&record.body)?)
}

fn parse_key(key: &[u8]) -> Option<u32> {
    std::str::from_utf8(key)
        .ok()?
        .strip_prefix(KEY_PREFIX)?
        .parse()
        .ok()
}

/// sled reports a held directory lock as an I/O error: `WouldBlock` from the
/// OS, or wrapped by sled itself as "could not acquire lock on ...".
fn is_lock_contention(e: &sled::Error) -> bool {
    match e {
        sled::Error::Io(io) => {
            io.kind() == ErrorKind::WouldBlock
                || io.to_string().starts_with("could not acquire lock")
        }
        _ => false,
    }
}
