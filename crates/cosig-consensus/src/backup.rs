// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// COSIG - BACKUP ROLE
//
// Follows the leader through both rounds. Every leader claim that can be
// recomputed locally is: the aggregated key from the bitmap, the challenge
// from the aggregated commit, and the collective signature against the
// aggregated key. Anything that does not check out is dropped.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use cosig_crypto::verify;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;

use crate::committee::Peer;
use crate::error::{ConsensusError, Result};
use crate::message::{
    AnnounceBody, ChallengeBody, CollectiveSigBody, CommitBody, ConsensusMessageType, Envelope,
    FailureBody, ResponseBody, Round, Sender,
};
use crate::role::{queue, ConsensusRole, OutboundMessage};
use crate::session::ConsensusSession;
use crate::state::{ConsensusErrorCode, State};

/// Application check run on the announced payload.
pub type PayloadValidator =
    Box<dyn Fn(&[u8]) -> std::result::Result<(), ConsensusErrorCode> + Send>;

pub struct ConsensusBackup {
    session: ConsensusSession,
    leader_id: u16,
    validator: PayloadValidator,
    outbound: Vec<OutboundMessage>,
}

impl ConsensusBackup {
    pub fn new(
        session: ConsensusSession,
        leader_id: u16,
        validator: PayloadValidator,
    ) -> Result<Self> {
        let known_leader = session.committee().get(leader_id as usize).is_some();
        if leader_id == session.my_id() || !known_leader {
            return Err(ConsensusError::InvalidMember {
                index: leader_id as usize,
            });
        }
        Ok(Self {
            session,
            leader_id,
            validator,
            outbound: Vec::new(),
        })
    }

    pub fn leader_id(&self) -> u16 {
        self.leader_id
    }

    /// Pick up a restored session where a commit is still owed to the
    /// leader: ANNOUNCE_DONE commits to the normal round, COLLECTIVESIG_DONE
    /// to the final round. Other states wait for the leader.
    pub fn resume(&mut self) -> bool {
        match self.session.state() {
            State::AnnounceDone => self.commit(Round::Normal),
            State::CollectiveSigDone => self.commit(Round::Final),
            state => {
                debug!(
                    "[session {}] nothing to resume in {}",
                    self.session.consensus_id(),
                    state
                );
                false
            }
        }
    }

    fn send_to_leader<T: serde::Serialize>(
        &mut self,
        msg_type: ConsensusMessageType,
        body: &T,
    ) -> bool {
        let to = vec![self.session.committee().member(self.leader_id as usize).peer];
        queue(&self.session, &mut self.outbound, to, msg_type, body)
    }

    fn from_leader<T: DeserializeOwned + Sender>(
        &self,
        message: &[u8],
        envelope: &Envelope,
        from: &Peer,
    ) -> Option<T> {
        let body: T = self.session.authenticate(message, envelope, from)?;
        if body.sender() != self.leader_id {
            debug!(
                "[session {}] {} from non-leader {}",
                self.session.consensus_id(),
                envelope.msg_type,
                body.sender()
            );
            return None;
        }
        Some(body)
    }

    fn commit(&mut self, round: Round) -> bool {
        let body = CommitBody {
            peer_id: self.session.my_id(),
            commit: self.session.generate_commit(),
        };
        if !self.send_to_leader(round.commit_type(), &body) {
            self.session.discard_commit();
            return false;
        }
        self.session.transition(match round {
            Round::Normal => State::CommitDone,
            Round::Final => State::FinalCommitDone,
        })
    }

    fn on_announce(&mut self, body: AnnounceBody) -> bool {
        let id = self.session.consensus_id();
        let same_block = body.block_number == self.session.block_number()
            && body.block_hash == self.session.block_hash();
        if !same_block {
            warn!(
                "[session {}] announcement for block {} does not match expected block {}",
                id,
                body.block_number,
                self.session.block_number()
            );
            return false;
        }

        if let Err(code) = (self.validator)(&body.payload) {
            let failure = FailureBody {
                peer_id: self.session.my_id(),
                error_code: code as u16,
            };
            self.send_to_leader(ConsensusMessageType::CommitFailure, &failure);
            self.session.abort(code);
            return false;
        }

        self.session.set_message_to_cosign(body.payload);
        self.session.transition(State::AnnounceDone);
        self.commit(Round::Normal)
    }

    fn on_challenge(&mut self, round: Round, body: ChallengeBody) -> bool {
        let id = self.session.consensus_id();
        if body.bitmap.len() != self.session.committee().len()
            || !body.aggregated_commit.is_valid()
        {
            warn!("[session {}] malformed {:?} challenge", id, round);
            return false;
        }
        let quorum = match body.bitmap.clone().into_quorum(self.session.quorum_size()) {
            Ok(q) => q,
            Err(bitmap) => {
                warn!("[session {}] challenge bitmap {:?} below quorum", id, bitmap);
                return false;
            }
        };
        match self.session.aggregate_keys(&quorum) {
            Ok(key) if key == body.aggregated_key => {}
            _ => {
                warn!("[session {}] challenge carries wrong aggregated key", id);
                return false;
            }
        }
        let Some(message) = self.session.message_for_round(round) else {
            return false;
        };
        let expected = self
            .session
            .get_challenge(&message, &body.aggregated_commit, &body.aggregated_key);
        if expected != body.challenge {
            warn!("[session {}] challenge does not match its inputs", id);
            return false;
        }

        // Reply first: a challenge we cannot answer leaves the state untouched.
        let my_id = self.session.my_id();
        if quorum.bitmap().is_set(my_id as usize) {
            let Some(response) = self.session.respond(&body.challenge) else {
                warn!("[session {}] challenged without a pending commit", id);
                return false;
            };
            let reply = ResponseBody {
                peer_id: my_id,
                response,
            };
            if !self.send_to_leader(round.response_type(), &reply) {
                return false;
            }
        } else {
            debug!("[session {}] not in {:?} quorum, no response", id, round);
            self.session.discard_commit();
        }

        let (challenge_done, response_done) = match round {
            Round::Normal => (State::ChallengeDone, State::ResponseDone),
            Round::Final => (State::FinalChallengeDone, State::FinalResponseDone),
        };
        self.session.set_challenge_bitmap(Some(body.bitmap));
        self.session.transition(challenge_done) && self.session.transition(response_done)
    }

    fn on_collective_sig(&mut self, round: Round, body: CollectiveSigBody) -> bool {
        let id = self.session.consensus_id();
        // None after a restore from a snapshot without a pending challenge.
        if let Some(challenged) = self.session.challenge_bitmap() {
            if challenged != &body.bitmap {
                warn!("[session {}] collective signature bitmap differs from challenge", id);
                return false;
            }
        }
        if body.bitmap.len() != self.session.committee().len() {
            return false;
        }
        let Ok(quorum) = body.bitmap.into_quorum(self.session.quorum_size()) else {
            return false;
        };
        let Ok(aggregated_key) = self.session.aggregate_keys(&quorum) else {
            return false;
        };
        let Some(message) = self.session.message_for_round(round) else {
            return false;
        };
        if !verify(&message, &body.signature, &aggregated_key) {
            warn!("[session {}] {:?} collective signature does not verify", id, round);
            return false;
        }

        self.session.store_collective_signature(round, body.signature, quorum);
        self.session.set_challenge_bitmap(None);
        match round {
            Round::Normal => {
                self.session.transition(State::CollectiveSigDone);
                self.commit(Round::Final)
            }
            Round::Final => {
                info!(
                    "[session {}] block {} co-signed",
                    id,
                    self.session.block_number()
                );
                self.session.transition(State::Done)
            }
        }
    }

    fn on_consensus_failure(&mut self, body: FailureBody) -> bool {
        let code = ConsensusErrorCode::from_u16(body.error_code)
            .unwrap_or(ConsensusErrorCode::GenericError);
        self.session.abort(code)
    }
}

impl ConsensusRole for ConsensusBackup {
    fn process_message(&mut self, message: &[u8], offset: usize, from: &Peer) -> bool {
        let Some(envelope) = self.session.open(message, offset) else {
            return false;
        };
        let state = self.session.state();

        use ConsensusMessageType::*;
        let accepted = matches!(
            (envelope.msg_type, state),
            (Announce, State::Initial)
                | (Challenge, State::CommitDone)
                | (CollectiveSig, State::ResponseDone)
                | (FinalChallenge, State::FinalCommitDone)
                | (FinalCollectiveSig, State::FinalResponseDone)
                | (ConsensusFailure, _)
        );
        if !accepted {
            debug!(
                "[session {}] {} not accepted in {}",
                self.session.consensus_id(),
                envelope.msg_type,
                state
            );
            return false;
        }

        let round = Round::of_state(state);
        match envelope.msg_type {
            Announce => match self.from_leader(message, &envelope, from) {
                Some(body) => self.on_announce(body),
                None => false,
            },
            Challenge | FinalChallenge => match self.from_leader(message, &envelope, from) {
                Some(body) => self.on_challenge(round, body),
                None => false,
            },
            CollectiveSig | FinalCollectiveSig => {
                match self.from_leader(message, &envelope, from) {
                    Some(body) => self.on_collective_sig(round, body),
                    None => false,
                }
            }
            ConsensusFailure => match self.from_leader(message, &envelope, from) {
                Some(body) => self.on_consensus_failure(body),
                None => false,
            },
            _ => false,
        }
    }

    fn session(&self) -> &ConsensusSession {
        &self.session
    }

    fn drain_outbound(&mut self) -> Vec<OutboundMessage> {
        std::mem::take(&mut self.outbound)
    }
}
