// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// COSIG - LEADER ROLE
//
// Drives both rounds:
// 1. ANNOUNCE the payload, contribute an own commit
// 2. on commit quorum: aggregate, derive the challenge, send CHALLENGE
// 3. check every response against its signer's commit and key
// 4. once every challenged member answered: aggregate, send COLLECTIVESIG
// The final round repeats 2-4 over payload || CS1 || B1 and ends in DONE.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use cosig_crypto::{verify, verify_response, Challenge, CommitPoint, PubKey, Response};
use log::{debug, info, warn};

use crate::aggregator::{Admission, Contributions};
use crate::bitmap::{ParticipationBitmap, QuorumBitmap};
use crate::committee::Peer;
use crate::message::{
    AnnounceBody, ChallengeBody, CollectiveSigBody, CommitBody, ConsensusMessageType,
    FailureBody, ResponseBody, Round,
};
use crate::role::{queue, ConsensusRole, OutboundMessage};
use crate::session::ConsensusSession;
use crate::state::{ConsensusErrorCode, State};

/// Challenge issued in the current round, kept to check responses.
struct IssuedChallenge {
    challenge: Challenge,
    aggregated_key: PubKey,
    message: Vec<u8>,
}

pub struct ConsensusLeader {
    session: ConsensusSession,
    round: Round,
    commits: Contributions<CommitPoint>,
    responses: Option<Contributions<Response>>,
    issued: Option<IssuedChallenge>,
    failures: ParticipationBitmap,
    outbound: Vec<OutboundMessage>,
}

impl ConsensusLeader {
    pub fn new(session: ConsensusSession) -> Self {
        let n = session.committee().len();
        let quorum = session.quorum_size();
        let round = Round::of_state(session.state());
        Self {
            session,
            round,
            commits: Contributions::new(n, quorum),
            responses: None,
            issued: None,
            failures: ParticipationBitmap::new(n),
            outbound: Vec::new(),
        }
    }

    /// Announce the payload to the committee and open the normal round.
    pub fn start_consensus(&mut self) -> bool {
        if self.session.state() != State::Initial {
            warn!(
                "[session {}] start_consensus called in {}",
                self.session.consensus_id(),
                self.session.state()
            );
            return false;
        }

        let body = AnnounceBody {
            leader_id: self.session.my_id(),
            block_number: self.session.block_number(),
            block_hash: self.session.block_hash().to_vec(),
            payload: self.session.message_to_cosign().to_vec(),
        };
        if !self.broadcast(ConsensusMessageType::Announce, &body) {
            self.session.abort(ConsensusErrorCode::GenericError);
            return false;
        }
        self.session.transition(State::AnnounceDone);
        info!(
            "[session {}] announced block {} to {} members",
            self.session.consensus_id(),
            self.session.block_number(),
            self.session.committee().len()
        );

        self.begin_round(Round::Normal);
        true
    }

    /// Reopen commit collection on a restored session. Collected commits
    /// and the own commit secret are not persisted, so only the points where
    /// a round starts can be resumed: ANNOUNCE_DONE and COLLECTIVESIG_DONE.
    pub fn resume(&mut self) -> bool {
        let round = match self.session.state() {
            State::AnnounceDone => Round::Normal,
            State::CollectiveSigDone => Round::Final,
            state => {
                warn!(
                    "[session {}] leader cannot resume in {}",
                    self.session.consensus_id(),
                    state
                );
                return false;
            }
        };
        info!(
            "[session {}] leader resuming {:?} round",
            self.session.consensus_id(),
            round
        );
        self.begin_round(round);
        true
    }

    pub fn round(&self) -> Round {
        self.round
    }

    /// Commits recorded after the current round's quorum closed.
    pub fn late_commits(&self) -> &ParticipationBitmap {
        self.commits.late()
    }

    /// Members that reported COMMITFAILURE.
    pub fn failures(&self) -> &ParticipationBitmap {
        &self.failures
    }

    fn begin_round(&mut self, round: Round) {
        self.round = round;
        let n = self.session.committee().len();
        self.commits = Contributions::new(n, self.session.quorum_size());
        self.responses = None;
        self.issued = None;

        let own = self.session.generate_commit();
        self.add_commit(self.session.my_id(), own);
    }

    fn broadcast<T: serde::Serialize>(
        &mut self,
        msg_type: ConsensusMessageType,
        body: &T,
    ) -> bool {
        let to = self.session.committee().peers_except(self.session.my_id());
        queue(&self.session, &mut self.outbound, to, msg_type, body)
    }

    // ─────────────────────────────────────────────────────────────────
    // COMMIT PHASE
    // ─────────────────────────────────────────────────────────────────

    fn add_commit(&mut self, peer_id: u16, commit: CommitPoint) -> bool {
        let id = self.session.consensus_id();
        match self.commits.add(peer_id as usize, commit) {
            Admission::Accepted { count } => {
                debug!(
                    "[session {}] {:?} commit from {} ({}/{})",
                    id,
                    self.round,
                    peer_id,
                    count,
                    self.commits.threshold()
                );
                true
            }
            Admission::QuorumReached(quorum) => {
                self.on_commit_quorum(quorum);
                true
            }
            Admission::Late => {
                debug!("[session {}] late {:?} commit from {} recorded", id, self.round, peer_id);
                true
            }
            Admission::Duplicate | Admission::NotEligible => {
                debug!("[session {}] commit from {} ignored", id, peer_id);
                false
            }
        }
    }

    fn on_commit_quorum(&mut self, quorum: QuorumBitmap) {
        let (commit_done, challenge_done) = match self.round {
            Round::Normal => (State::CommitDone, State::ChallengeDone),
            Round::Final => (State::FinalCommitDone, State::FinalChallengeDone),
        };
        if !self.session.transition(commit_done) {
            return;
        }

        let aggregated = self
            .session
            .aggregate_commits(&quorum, &self.commits)
            .and_then(|commit| Ok((commit, self.session.aggregate_keys(&quorum)?)));
        let (aggregated_commit, aggregated_key) = match aggregated {
            Ok(pair) => pair,
            Err(e) => {
                warn!("[session {}] commit aggregation failed: {}", self.session.consensus_id(), e);
                self.session.abort(ConsensusErrorCode::GenericError);
                return;
            }
        };
        let Some(message) = self.session.message_for_round(self.round) else {
            self.session.abort(ConsensusErrorCode::GenericError);
            return;
        };
        let challenge = self
            .session
            .get_challenge(&message, &aggregated_commit, &aggregated_key);

        let body = ChallengeBody {
            leader_id: self.session.my_id(),
            aggregated_commit,
            aggregated_key,
            challenge,
            bitmap: quorum.bitmap().clone(),
        };
        if !self.broadcast(self.round.challenge_type(), &body) {
            self.session.abort(ConsensusErrorCode::GenericError);
            return;
        }
        self.session.transition(challenge_done);
        info!(
            "[session {}] {:?} challenge issued to {:?}",
            self.session.consensus_id(),
            self.round,
            quorum.bitmap()
        );

        self.responses = Some(Contributions::eligible(quorum.bitmap()));
        self.issued = Some(IssuedChallenge {
            challenge,
            aggregated_key,
            message,
        });

        let my_id = self.session.my_id();
        if quorum.bitmap().is_set(my_id as usize) {
            if let Some(response) = self.session.respond(&challenge) {
                self.add_response(my_id, response);
            }
        } else {
            self.session.discard_commit();
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // RESPONSE PHASE
    // ─────────────────────────────────────────────────────────────────

    fn add_response(&mut self, peer_id: u16, response: Response) -> bool {
        let (Some(issued), Some(responses)) = (&self.issued, &mut self.responses) else {
            return false;
        };
        let Some(commit) = self.commits.get(peer_id as usize) else {
            debug!(
                "[session {}] response from non-committer {}",
                self.session.consensus_id(),
                peer_id
            );
            return false;
        };
        let Some(member) = self.session.committee().get(peer_id as usize) else {
            return false;
        };
        if !verify_response(&response, &issued.challenge, &member.pub_key, commit) {
            warn!(
                "[session {}] invalid {:?} response from {}",
                self.session.consensus_id(),
                self.round,
                peer_id
            );
            return false;
        }

        match responses.add(peer_id as usize, response) {
            Admission::Accepted { count } => {
                debug!(
                    "[session {}] {:?} response from {} ({}/{})",
                    self.session.consensus_id(),
                    self.round,
                    peer_id,
                    count,
                    responses.threshold()
                );
                true
            }
            Admission::QuorumReached(quorum) => {
                self.on_response_quorum(quorum);
                true
            }
            Admission::Late | Admission::Duplicate | Admission::NotEligible => false,
        }
    }

    fn on_response_quorum(&mut self, quorum: QuorumBitmap) {
        let response_done = match self.round {
            Round::Normal => State::ResponseDone,
            Round::Final => State::FinalResponseDone,
        };
        if !self.session.transition(response_done) {
            return;
        }
        let (Some(issued), Some(responses)) = (&self.issued, &self.responses) else {
            return;
        };

        let aggregated = match self.session.aggregate_responses(&quorum, responses) {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    "[session {}] response aggregation failed: {}",
                    self.session.consensus_id(),
                    e
                );
                self.session.abort(ConsensusErrorCode::GenericError);
                return;
            }
        };
        let signature = self.session.aggregate_sign(&issued.challenge, &aggregated);
        if !verify(&issued.message, &signature, &issued.aggregated_key) {
            warn!(
                "[session {}] {:?} collective signature does not verify",
                self.session.consensus_id(),
                self.round
            );
            self.session.abort(ConsensusErrorCode::GenericError);
            return;
        }

        let body = CollectiveSigBody {
            leader_id: self.session.my_id(),
            signature,
            bitmap: quorum.bitmap().clone(),
        };
        self.session.store_collective_signature(self.round, signature, quorum);
        if !self.broadcast(self.round.collective_sig_type(), &body) {
            self.session.abort(ConsensusErrorCode::GenericError);
            return;
        }

        match self.round {
            Round::Normal => {
                self.session.transition(State::CollectiveSigDone);
                self.begin_round(Round::Final);
            }
            Round::Final => {
                self.session.transition(State::Done);
                info!(
                    "[session {}] consensus reached on block {}",
                    self.session.consensus_id(),
                    self.session.block_number()
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // FAILURES
    // ─────────────────────────────────────────────────────────────────

    fn on_commit_failure(&mut self, body: FailureBody) -> bool {
        if body.peer_id == self.session.my_id() {
            return false;
        }
        let code = ConsensusErrorCode::from_u16(body.error_code)
            .unwrap_or(ConsensusErrorCode::GenericError);
        if !self.failures.set(body.peer_id as usize) {
            return false;
        }
        warn!(
            "[session {}] member {} rejected the announcement: {}",
            self.session.consensus_id(),
            body.peer_id,
            code
        );
        self.session.set_error_code(code);

        if self.failures.count() > self.num_for_consensus_failure() {
            let body = FailureBody {
                peer_id: self.session.my_id(),
                error_code: code as u16,
            };
            self.broadcast(ConsensusMessageType::ConsensusFailure, &body);
            self.session.abort(code);
        }
        true
    }

    fn accepts_commit(&self, round: Round) -> bool {
        let state = self.session.state();
        round == self.round && state != State::Initial && !state.is_terminal()
    }

    fn accepts_response(&self, round: Round) -> bool {
        let expected = match round {
            Round::Normal => State::ChallengeDone,
            Round::Final => State::FinalChallengeDone,
        };
        round == self.round && self.session.state() == expected
    }
}

impl ConsensusRole for ConsensusLeader {
    fn process_message(&mut self, message: &[u8], offset: usize, from: &Peer) -> bool {
        let Some(envelope) = self.session.open(message, offset) else {
            return false;
        };

        use ConsensusMessageType as Msg;
        match envelope.msg_type {
            Msg::Commit | Msg::FinalCommit => {
                let round = if envelope.msg_type == Msg::Commit {
                    Round::Normal
                } else {
                    Round::Final
                };
                if !self.accepts_commit(round) {
                    debug!(
                        "[session {}] {} not accepted in {}",
                        self.session.consensus_id(),
                        envelope.msg_type,
                        self.session.state()
                    );
                    return false;
                }
                let Some(body) = self.session.authenticate::<CommitBody>(message, &envelope, from)
                else {
                    return false;
                };
                if !body.commit.is_valid() {
                    warn!(
                        "[session {}] undecodable commit point from {}",
                        self.session.consensus_id(),
                        body.peer_id
                    );
                    return false;
                }
                self.add_commit(body.peer_id, body.commit)
            }
            Msg::Response | Msg::FinalResponse => {
                let round = if envelope.msg_type == Msg::Response {
                    Round::Normal
                } else {
                    Round::Final
                };
                if !self.accepts_response(round) {
                    debug!(
                        "[session {}] {} not accepted in {}",
                        self.session.consensus_id(),
                        envelope.msg_type,
                        self.session.state()
                    );
                    return false;
                }
                match self.session.authenticate::<ResponseBody>(message, &envelope, from) {
                    Some(body) => self.add_response(body.peer_id, body.response),
                    None => false,
                }
            }
            Msg::CommitFailure => {
                match self.session.authenticate::<FailureBody>(message, &envelope, from) {
                    Some(body) => self.on_commit_failure(body),
                    None => false,
                }
            }
            other => {
                debug!(
                    "[session {}] leader ignores {}",
                    self.session.consensus_id(),
                    other
                );
                false
            }
        }
    }

    fn session(&self) -> &ConsensusSession {
        &self.session
    }

    fn drain_outbound(&mut self) -> Vec<OutboundMessage> {
        std::mem::take(&mut self.outbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::ConsensusBackup;
    use crate::committee::Committee;
    use crate::config::ConsensusConfig;
    use crate::message::TYPE_OFFSET;
    use crate::session::SessionParams;
    use cosig_crypto::{compute_response, CommitSecret, KeyPair};
    use std::net::SocketAddr;
    use std::sync::Arc;

    const PAYLOAD: &[u8] = b"leader payload";

    fn accept_all(_: &[u8]) -> std::result::Result<(), ConsensusErrorCode> {
        Ok(())
    }

    fn session_of(
        keys: &[KeyPair],
        committee: &Arc<Committee>,
        my_id: u16,
        payload: Vec<u8>,
    ) -> ConsensusSession {
        ConsensusSession::new(
            SessionParams {
                consensus_id: 21,
                block_number: 8,
                block_hash: vec![0x21; 32],
                my_id,
                private_key: keys[my_id as usize].private_key.clone(),
                committee: Arc::clone(committee),
                message_to_cosign: payload,
            },
            &ConsensusConfig::default(),
        )
        .unwrap()
    }

    /// Leader (member 0) and three honest backups.
    struct Harness {
        keys: Vec<KeyPair>,
        committee: Arc<Committee>,
        leader: ConsensusLeader,
        backups: Vec<ConsensusBackup>,
    }

    impl Harness {
        fn new() -> Self {
            let keys: Vec<KeyPair> = (0..4u8)
                .map(|i| KeyPair::from_seed(&[0x60 + i; 32]))
                .collect();
            let members = keys
                .iter()
                .enumerate()
                .map(|(i, kp)| {
                    let addr: SocketAddr = format!("127.0.0.1:{}", 7200 + i).parse().unwrap();
                    (kp.public_key, Peer::new(addr))
                })
                .collect();
            let committee = Arc::new(Committee::new(members).unwrap());
            let leader = ConsensusLeader::new(session_of(&keys, &committee, 0, PAYLOAD.to_vec()));
            let backups = (1..4)
                .map(|i| {
                    let s = session_of(&keys, &committee, i, Vec::new());
                    ConsensusBackup::new(s, 0, Box::new(accept_all)).unwrap()
                })
                .collect();
            Self {
                keys,
                committee,
                leader,
                backups,
            }
        }

        fn peer(&self, index: usize) -> Peer {
            self.committee.member(index).peer
        }

        fn state(&self) -> State {
            self.leader.session().state()
        }

        /// A bare session holding `member`'s key, for forging its messages.
        fn signer(&self, member: u16) -> ConsensusSession {
            session_of(&self.keys, &self.committee, member, Vec::new())
        }

        fn to_leader(&mut self, member: usize, msg: &[u8]) -> bool {
            let from = self.peer(member);
            self.leader.process_message(msg, TYPE_OFFSET, &from)
        }

        /// Deliver a leader broadcast to `member`; returns its single reply.
        fn to_backup(&mut self, member: usize, msg: &[u8]) -> Option<Vec<u8>> {
            let from = self.peer(0);
            let backup = &mut self.backups[member - 1];
            assert!(backup.process_message(msg, TYPE_OFFSET, &from));
            backup.drain_outbound().pop().map(|out| out.bytes)
        }

        /// ANNOUNCE, then commits from members 1 and 2. Returns the CHALLENGE
        /// broadcast and member 3's commit, still undelivered.
        fn reach_challenge(&mut self) -> (Vec<u8>, Vec<u8>) {
            assert!(self.leader.start_consensus());
            let announce = self.leader.drain_outbound().remove(0).bytes;
            let commits: Vec<Vec<u8>> = (1..4)
                .map(|member| self.to_backup(member, &announce).unwrap())
                .collect();
            assert!(self.to_leader(1, &commits[0]));
            assert_eq!(self.state(), State::AnnounceDone);
            assert!(self.to_leader(2, &commits[1]));
            assert_eq!(self.state(), State::ChallengeDone);
            let challenge = self.leader.drain_outbound().remove(0).bytes;
            (challenge, commits[2].clone())
        }

        fn challenge_body(&self, msg: &[u8]) -> ChallengeBody {
            let session = self.backups[0].session();
            let envelope = session.open(msg, TYPE_OFFSET).unwrap();
            session.authenticate(msg, &envelope, &self.peer(0)).unwrap()
        }

        fn forged_response(&self, member: u16, peer_id: u16, challenge: &Challenge) -> Vec<u8> {
            let body = ResponseBody {
                peer_id,
                response: compute_response(
                    &CommitSecret::new(),
                    challenge,
                    &self.keys[member as usize].private_key,
                ),
            };
            self.signer(member)
                .compose_message(ConsensusMessageType::Response, &body)
                .unwrap()
        }
    }

    #[test]
    fn test_invalid_partial_response_rejected() {
        let mut h = Harness::new();
        let (challenge, _) = h.reach_challenge();
        let body = h.challenge_body(&challenge);

        // Answers the challenge with a secret that was never committed.
        let forged = h.forged_response(1, 1, &body.challenge);
        assert!(!h.to_leader(1, &forged));
        assert_eq!(h.state(), State::ChallengeDone);
        assert!(h.leader.drain_outbound().is_empty());

        // The genuine response from the same member still counts.
        let reply = h.to_backup(1, &challenge).unwrap();
        assert!(h.to_leader(1, &reply));
        assert!(!h.to_leader(1, &reply), "duplicate response");
        assert_eq!(h.state(), State::ChallengeDone);
    }

    #[test]
    fn test_response_outside_challenge_bitmap() {
        let mut h = Harness::new();
        let (challenge, late_commit) = h.reach_challenge();
        assert!(h.to_leader(3, &late_commit));
        assert!(h.leader.late_commits().is_set(3));

        let body = h.challenge_body(&challenge);
        assert!(!body.bitmap.is_set(3));
        assert!(h.to_backup(3, &challenge).is_none());

        let forged = h.forged_response(3, 3, &body.challenge);
        assert!(!h.to_leader(3, &forged));
        assert_eq!(h.state(), State::ChallengeDone);
    }

    #[test]
    fn test_response_signed_by_another_member() {
        let mut h = Harness::new();
        let (challenge, _) = h.reach_challenge();
        let body = h.challenge_body(&challenge);

        // Member 2 signs a body that claims to come from member 1.
        let forged = h.forged_response(2, 1, &body.challenge);
        assert!(!h.to_leader(1, &forged));
        assert!(!h.to_leader(2, &forged));
        assert_eq!(h.state(), State::ChallengeDone);
    }

    #[test]
    fn test_response_before_challenge_dropped() {
        let mut h = Harness::new();
        assert!(h.leader.start_consensus());
        h.leader.drain_outbound();

        let stray = h.leader.session().get_challenge(
            PAYLOAD,
            &CommitSecret::new().commit_point(),
            &h.keys[1].public_key,
        );
        let early = h.forged_response(1, 1, &stray);
        assert!(!h.to_leader(1, &early));
        assert_eq!(h.state(), State::AnnounceDone);
    }

    #[test]
    fn test_commit_failure_needs_its_sender_signature() {
        let mut h = Harness::new();
        assert!(h.leader.start_consensus());

        let body = FailureBody {
            peer_id: 2,
            error_code: ConsensusErrorCode::MissingTxn as u16,
        };
        let forged = h
            .signer(1)
            .compose_message(ConsensusMessageType::CommitFailure, &body)
            .unwrap();
        assert!(!h.to_leader(2, &forged));
        assert_eq!(h.leader.failures().count(), 0);
        assert_eq!(h.leader.session().error_code(), ConsensusErrorCode::NoError);

        let genuine = h
            .signer(2)
            .compose_message(ConsensusMessageType::CommitFailure, &body)
            .unwrap();
        assert!(h.to_leader(2, &genuine));
        assert!(!h.to_leader(2, &genuine), "counted once per member");
        assert_eq!(h.leader.failures().count(), 1);
        assert_eq!(h.state(), State::AnnounceDone);
    }

    #[test]
    fn test_round_follows_restored_state() {
        let h = Harness::new();
        let session = h.signer(0);
        session.recover_to_state(State::FinalCommitDone);
        let mut leader = ConsensusLeader::new(session);
        assert_eq!(leader.round(), Round::Final);
        assert!(!leader.resume());

        let session = h.signer(0);
        session.recover_to_state(State::ChallengeDone);
        let mut leader = ConsensusLeader::new(session);
        assert_eq!(leader.round(), Round::Normal);
        assert!(!leader.resume());
    }

    #[test]
    fn test_resume_final_round_after_restart() {
        let mut h = Harness::new();
        let (challenge, _) = h.reach_challenge();
        for member in 1..3 {
            let reply = h.to_backup(member, &challenge).unwrap();
            assert!(h.to_leader(member, &reply));
        }
        assert_eq!(h.state(), State::CollectiveSigDone);
        let cs1 = h.leader.drain_outbound().remove(0).bytes;

        let mut session = session_of(&h.keys, &h.committee, 0, Vec::new());
        session.restore(h.leader.session().snapshot()).unwrap();
        h.leader = ConsensusLeader::new(session);
        assert_eq!(h.leader.round(), Round::Final);
        assert!(h.leader.resume());

        for member in 1..3 {
            let final_commit = h.to_backup(member, &cs1).unwrap();
            assert!(h.to_leader(member, &final_commit));
        }
        assert_eq!(h.state(), State::FinalChallengeDone);
        let out = h.leader.drain_outbound();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bytes[TYPE_OFFSET], ConsensusMessageType::FinalChallenge as u8);
    }
}
