// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// COSIG - COMMITTEE REGISTRY
//
// Ordered, immutable roster for one session. A member's index is its
// position and is used as its identity in every bitmap and message.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use cosig_crypto::PubKey;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;

use crate::bitmap::ParticipationBitmap;
use crate::error::{ConsensusError, Result};

/// Network location of a committee member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub addr: SocketAddr,
}

impl Peer {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.addr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitteeMember {
    pub pub_key: PubKey,
    pub peer: Peer,
}

#[derive(Debug, Clone)]
pub struct Committee {
    members: Vec<CommitteeMember>,
}

impl Committee {
    /// Build the roster. Rejects empty rosters, undecodable keys and
    /// duplicate public keys.
    pub fn new(members: Vec<(PubKey, Peer)>) -> Result<Self> {
        if members.is_empty() {
            return Err(ConsensusError::EmptyCommittee);
        }
        if members.len() > u16::MAX as usize {
            return Err(ConsensusError::CommitteeTooLarge(members.len()));
        }

        let mut seen = HashSet::with_capacity(members.len());
        for (index, (pub_key, _)) in members.iter().enumerate() {
            if !pub_key.is_valid() {
                return Err(ConsensusError::InvalidMember { index });
            }
            if !seen.insert(*pub_key) {
                return Err(ConsensusError::DuplicateMember { index });
            }
        }

        Ok(Self {
            members: members
                .into_iter()
                .map(|(pub_key, peer)| CommitteeMember { pub_key, peer })
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member at `index`.
    ///
    /// # Panics
    /// If `index` is out of range. Indices come from size-bounded bitmaps or
    /// from `get`, so an out-of-range index is a caller bug.
    pub fn member(&self, index: usize) -> &CommitteeMember {
        assert!(
            index < self.members.len(),
            "committee index {} out of range {}",
            index,
            self.members.len()
        );
        &self.members[index]
    }

    /// Checked lookup for indices taken from untrusted input.
    pub fn get(&self, index: usize) -> Option<&CommitteeMember> {
        self.members.get(index)
    }

    pub fn index_of(&self, pub_key: &PubKey) -> Option<u16> {
        self.members
            .iter()
            .position(|m| m.pub_key == *pub_key)
            .map(|i| i as u16)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommitteeMember> {
        self.members.iter()
    }

    /// Public keys of every member whose bit is set.
    pub fn public_keys_for(&self, bitmap: &ParticipationBitmap) -> Vec<PubKey> {
        assert_eq!(
            bitmap.len(),
            self.members.len(),
            "bitmap length does not match committee size"
        );
        bitmap
            .iter_set()
            .map(|i| self.members[i].pub_key)
            .collect()
    }

    /// Peers of every member except `exclude`.
    pub fn peers_except(&self, exclude: u16) -> Vec<Peer> {
        self.members
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != exclude as usize)
            .map(|(_, m)| m.peer)
            .collect()
    }
}
