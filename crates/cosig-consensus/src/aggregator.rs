// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// COSIG - ROUND CONTRIBUTION COLLECTOR
//
// One collector per phase (commits, responses) per round. Each peer owns a
// fixed slot. The collector closes the moment the quorum threshold is met;
// the bitmap it hands out at that point is frozen and later arrivals go to a
// separate late bitmap so they can never leak into an aggregate.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use cosig_crypto::Signature;
use serde::{Deserialize, Serialize};

use crate::bitmap::{ParticipationBitmap, QuorumBitmap};

/// Outcome of offering one contribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Stored; quorum not reached yet.
    Accepted { count: usize },
    /// Stored, and this contribution completed the quorum.
    QuorumReached(QuorumBitmap),
    /// Peer already contributed in this phase.
    Duplicate,
    /// Arrived after the collector closed. Recorded, never aggregated.
    Late,
    /// Peer is outside the set allowed to contribute in this phase.
    NotEligible,
}

#[derive(Debug)]
pub struct Contributions<T> {
    slots: Box<[Option<T>]>,
    present: ParticipationBitmap,
    late: ParticipationBitmap,
    eligible: Option<ParticipationBitmap>,
    threshold: usize,
    closed: bool,
}

impl<T: Clone> Contributions<T> {
    /// Collector open to every committee member.
    pub fn new(committee_size: usize, threshold: usize) -> Self {
        Self {
            slots: vec![None; committee_size].into_boxed_slice(),
            present: ParticipationBitmap::new(committee_size),
            late: ParticipationBitmap::new(committee_size),
            eligible: None,
            threshold,
            closed: false,
        }
    }

    /// Collector restricted to `eligible`; it closes only once every
    /// eligible peer has contributed.
    pub fn eligible(eligible: &ParticipationBitmap) -> Self {
        let mut this = Self::new(eligible.len(), eligible.count());
        this.eligible = Some(eligible.clone());
        this
    }

    pub fn add(&mut self, peer: usize, value: T) -> Admission {
        if peer >= self.slots.len() {
            return Admission::NotEligible;
        }
        if let Some(eligible) = &self.eligible {
            if !eligible.is_set(peer) {
                return Admission::NotEligible;
            }
        }
        if self.present.is_set(peer) || self.late.is_set(peer) {
            return Admission::Duplicate;
        }
        if self.closed {
            self.late.set(peer);
            return Admission::Late;
        }

        self.slots[peer] = Some(value);
        self.present.set(peer);

        match self.present.clone().into_quorum(self.threshold) {
            Ok(quorum) => {
                self.closed = true;
                Admission::QuorumReached(quorum)
            }
            Err(_) => Admission::Accepted {
                count: self.present.count(),
            },
        }
    }

    /// Contributions of exactly the peers in `quorum`, in index order.
    pub fn collect(&self, quorum: &QuorumBitmap) -> Vec<T> {
        quorum
            .bitmap()
            .iter_set()
            .filter_map(|i| self.slots.get(i).and_then(|slot| slot.clone()))
            .collect()
    }

    pub fn get(&self, peer: usize) -> Option<&T> {
        self.slots.get(peer).and_then(Option::as_ref)
    }

    pub fn count(&self) -> usize {
        self.present.count()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn present(&self) -> &ParticipationBitmap {
        &self.present
    }

    pub fn late(&self) -> &ParticipationBitmap {
        &self.late
    }
}

/// Collective signature of one round together with the bitmap it was
/// produced under. Stored and replaced only as a pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundArtifact {
    pub signature: Signature,
    pub bitmap: ParticipationBitmap,
}
