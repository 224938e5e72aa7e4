// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// COSIG - CONSENSUS SESSION
//
// State shared by the leader and backup roles for one consensus instance:
// identity, committee, the payload being co-signed, the state machine, the
// error code and the two round artifacts (CS1/B1, CS2/B2).
//
// Round 1 co-signs the payload. Round 2 co-signs payload || CS1 || B1, so a
// final collective signature also proves the first one.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use cosig_crypto::{
    multisig, sign, verify, Challenge, CommitPoint, CommitSecret, CryptoError, PrivKey, PubKey,
    Response, Signature,
};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::aggregator::{Contributions, RoundArtifact};
use crate::bitmap::{ParticipationBitmap, QuorumBitmap};
use crate::committee::{Committee, Peer};
use crate::config::ConsensusConfig;
use crate::error::{ConsensusError, Result};
use crate::gate::{Admitted, GateRejection, MessageGate};
use crate::message::{frame_unsigned, ConsensusMessageType, Envelope, Round, Sender};
use crate::snapshot::SessionSnapshot;
use crate::state::{AtomicState, ConsensusErrorCode, State, StateObserver};

/// Tolerance fraction in thousandths.
const TOLERANCE_PER_MILLE: usize = 667;

/// Smallest count strictly greater than 0.667 * n.
pub fn num_for_consensus(committee_size: usize) -> usize {
    committee_size * TOLERANCE_PER_MILLE / 1000 + 1
}

/// Inputs to `ConsensusSession::new`.
pub struct SessionParams {
    pub consensus_id: u32,
    pub block_number: u64,
    pub block_hash: Vec<u8>,
    pub my_id: u16,
    pub private_key: PrivKey,
    pub committee: Arc<Committee>,
    /// Payload to co-sign. Backups start empty and learn it from ANNOUNCE.
    pub message_to_cosign: Vec<u8>,
}

pub struct ConsensusSession {
    consensus_id: u32,
    block_number: u64,
    block_hash: Vec<u8>,
    my_id: u16,
    private_key: PrivKey,
    committee: Arc<Committee>,
    message_to_cosign: Vec<u8>,
    class_byte: u8,
    ins_byte: u8,
    state: AtomicState,
    error_code: ConsensusErrorCode,
    round1: Option<RoundArtifact>,
    round2: Option<RoundArtifact>,
    challenge_bitmap: Option<ParticipationBitmap>,
    commit_secret: Option<CommitSecret>,
    commit_point: Option<CommitPoint>,
    gate: MessageGate,
}

impl ConsensusSession {
    pub fn new(params: SessionParams, config: &ConsensusConfig) -> Result<Self> {
        let my_key = params.private_key.public_key();
        match params.committee.get(params.my_id as usize) {
            Some(member) if member.pub_key == my_key => {}
            _ => {
                return Err(ConsensusError::KeyMismatch {
                    my_id: params.my_id,
                })
            }
        }

        debug!(
            "[session {}] created for block {} as member {}/{}",
            params.consensus_id,
            params.block_number,
            params.my_id,
            params.committee.len()
        );

        Ok(Self {
            consensus_id: params.consensus_id,
            block_number: params.block_number,
            block_hash: params.block_hash,
            my_id: params.my_id,
            private_key: params.private_key,
            committee: params.committee,
            message_to_cosign: params.message_to_cosign,
            class_byte: config.class_byte,
            ins_byte: config.ins_byte,
            state: AtomicState::new(State::Initial),
            error_code: ConsensusErrorCode::NoError,
            round1: None,
            round2: None,
            challenge_bitmap: None,
            commit_secret: None,
            commit_point: None,
            gate: MessageGate::new(params.consensus_id, config.max_message_bytes),
        })
    }

    // ─────────────────────────────────────────────────────────────────
    // IDENTITY
    // ─────────────────────────────────────────────────────────────────

    pub fn consensus_id(&self) -> u32 {
        self.consensus_id
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn block_hash(&self) -> &[u8] {
        &self.block_hash
    }

    pub fn my_id(&self) -> u16 {
        self.my_id
    }

    pub fn committee(&self) -> &Arc<Committee> {
        &self.committee
    }

    pub fn message_to_cosign(&self) -> &[u8] {
        &self.message_to_cosign
    }

    pub(crate) fn set_message_to_cosign(&mut self, payload: Vec<u8>) {
        self.message_to_cosign = payload;
    }

    // ─────────────────────────────────────────────────────────────────
    // STATE MACHINE
    // ─────────────────────────────────────────────────────────────────

    pub fn state(&self) -> State {
        self.state.load()
    }

    pub fn state_string(&self) -> &'static str {
        self.state().as_str()
    }

    pub fn observer(&self) -> StateObserver {
        self.state.observer()
    }

    /// Move to `next` if it is the immediate successor (or ERROR from a
    /// non-terminal state). Returns false and leaves the state alone otherwise.
    pub fn transition(&self, next: State) -> bool {
        match self.state.transition(next) {
            Ok(prev) => {
                debug!("[session {}] {} -> {}", self.consensus_id, prev, next);
                true
            }
            Err(current) => {
                debug!(
                    "[session {}] illegal transition {} -> {}",
                    self.consensus_id, current, next
                );
                false
            }
        }
    }

    /// Record `code` and enter ERROR.
    pub fn abort(&mut self, code: ConsensusErrorCode) -> bool {
        self.error_code = code;
        warn!(
            "[session {}] aborting in {}: {}",
            self.consensus_id,
            self.state(),
            code
        );
        self.transition(State::Error)
    }

    pub fn error_code(&self) -> ConsensusErrorCode {
        self.error_code
    }

    pub fn error_msg(&self) -> &'static str {
        self.error_code.message()
    }

    pub fn set_error_code(&mut self, code: ConsensusErrorCode) {
        self.error_code = code;
    }

    /// Overwrite the state unconditionally. Artifacts are left untouched.
    pub fn recover_to_state(&self, target: State) {
        warn!(
            "[session {}] forced recovery {} -> {}",
            self.consensus_id,
            self.state(),
            target
        );
        self.state.force(target);
    }

    // ─────────────────────────────────────────────────────────────────
    // QUORUM & GATING
    // ─────────────────────────────────────────────────────────────────

    pub fn quorum_size(&self) -> usize {
        num_for_consensus(self.committee.len())
    }

    /// True iff the big-endian u32 at `offset` equals this session's ID.
    pub fn can_process_message(&self, message: &[u8], offset: usize) -> bool {
        MessageGate::read_consensus_id(message, offset) == Some(self.consensus_id)
    }

    /// Gate checks for a message whose type byte is at `offset`.
    pub fn admit(
        &self,
        message: &[u8],
        offset: usize,
    ) -> std::result::Result<Admitted, GateRejection> {
        self.gate.admit(message, offset.saturating_add(1), self.state())
    }

    // ─────────────────────────────────────────────────────────────────
    // SIGNING
    // ─────────────────────────────────────────────────────────────────

    /// Sign `message[offset..offset + size]` with this node's key.
    ///
    /// # Panics
    /// If the range falls outside `message`.
    pub fn sign_message(&self, message: &[u8], offset: usize, size: usize) -> Signature {
        let end = offset.checked_add(size);
        assert!(
            matches!(end, Some(end) if end <= message.len()),
            "sign range {}+{} outside message of {} bytes",
            offset,
            size,
            message.len()
        );
        sign(&message[offset..offset + size], &self.private_key)
    }

    /// Verify `signature` over `message[offset..offset + size]` against the
    /// key of committee member `peer_id`. False on any mismatch or bad range.
    pub fn verify_message(
        &self,
        message: &[u8],
        offset: usize,
        size: usize,
        signature: &Signature,
        peer_id: u16,
    ) -> bool {
        let Some(member) = self.committee.get(peer_id as usize) else {
            return false;
        };
        let Some(bytes) = offset
            .checked_add(size)
            .and_then(|end| message.get(offset..end))
        else {
            return false;
        };
        verify(bytes, signature, &member.pub_key)
    }

    // ─────────────────────────────────────────────────────────────────
    // AGGREGATION
    // ─────────────────────────────────────────────────────────────────

    pub fn aggregate_keys(
        &self,
        quorum: &QuorumBitmap,
    ) -> std::result::Result<PubKey, CryptoError> {
        self.check_bitmap_len(quorum.bitmap())?;
        multisig::aggregate_keys(&self.committee.public_keys_for(quorum.bitmap()))
    }

    pub fn aggregate_commits(
        &self,
        quorum: &QuorumBitmap,
        commits: &Contributions<CommitPoint>,
    ) -> std::result::Result<CommitPoint, CryptoError> {
        self.check_bitmap_len(quorum.bitmap())?;
        let collected = commits.collect(quorum);
        check_complete(quorum, collected.len())?;
        multisig::aggregate_commits(&collected)
    }

    pub fn aggregate_responses(
        &self,
        quorum: &QuorumBitmap,
        responses: &Contributions<Response>,
    ) -> std::result::Result<Response, CryptoError> {
        self.check_bitmap_len(quorum.bitmap())?;
        let collected = responses.collect(quorum);
        check_complete(quorum, collected.len())?;
        multisig::aggregate_responses(&collected)
    }

    pub fn get_challenge(
        &self,
        message: &[u8],
        aggregated_commit: &CommitPoint,
        aggregated_key: &PubKey,
    ) -> Challenge {
        multisig::derive_challenge(message, aggregated_commit, aggregated_key)
    }

    pub fn aggregate_sign(
        &self,
        challenge: &Challenge,
        aggregated_response: &Response,
    ) -> Signature {
        multisig::aggregate_sign(challenge, aggregated_response)
    }

    fn check_bitmap_len(
        &self,
        bitmap: &ParticipationBitmap,
    ) -> std::result::Result<(), CryptoError> {
        if bitmap.len() != self.committee.len() {
            return Err(CryptoError::InvalidLength {
                expected: self.committee.len(),
                actual: bitmap.len(),
            });
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────
    // COMMIT SECRETS
    // ─────────────────────────────────────────────────────────────────

    /// Draw a fresh commit secret for the current round, replacing (and
    /// zeroizing) any previous one.
    pub fn generate_commit(&mut self) -> CommitPoint {
        let secret = CommitSecret::new();
        let point = secret.commit_point();
        self.commit_secret = Some(secret);
        self.commit_point = Some(point);
        point
    }

    pub fn commit_point(&self) -> Option<CommitPoint> {
        self.commit_point
    }

    /// Answer `challenge` with the pending commit secret. The secret is
    /// consumed; a second call returns None.
    pub fn respond(&mut self, challenge: &Challenge) -> Option<Response> {
        let secret = self.commit_secret.take()?;
        Some(multisig::compute_response(&secret, challenge, &self.private_key))
    }

    /// Drop the pending commit secret without using it.
    pub fn discard_commit(&mut self) {
        self.commit_secret = None;
        self.commit_point = None;
    }

    // ─────────────────────────────────────────────────────────────────
    // ROUND ARTIFACTS
    // ─────────────────────────────────────────────────────────────────

    pub fn cs1(&self) -> Option<&Signature> {
        self.round1.as_ref().map(|a| &a.signature)
    }

    pub fn b1(&self) -> Option<&ParticipationBitmap> {
        self.round1.as_ref().map(|a| &a.bitmap)
    }

    pub fn cs2(&self) -> Option<&Signature> {
        self.round2.as_ref().map(|a| &a.signature)
    }

    pub fn b2(&self) -> Option<&ParticipationBitmap> {
        self.round2.as_ref().map(|a| &a.bitmap)
    }

    pub fn round_artifact(&self, round: Round) -> Option<&RoundArtifact> {
        match round {
            Round::Normal => self.round1.as_ref(),
            Round::Final => self.round2.as_ref(),
        }
    }

    /// Bitmap of the challenge this node answered in the current round,
    /// kept until the matching collective signature arrives.
    pub fn challenge_bitmap(&self) -> Option<&ParticipationBitmap> {
        self.challenge_bitmap.as_ref()
    }

    pub(crate) fn set_challenge_bitmap(&mut self, bitmap: Option<ParticipationBitmap>) {
        self.challenge_bitmap = bitmap;
    }

    /// Store a round's collective signature together with its bitmap.
    pub fn store_collective_signature(
        &mut self,
        round: Round,
        signature: Signature,
        quorum: QuorumBitmap,
    ) {
        let bitmap = quorum.into_inner();
        info!(
            "[session {}] {:?} round signed by {} members {:?}",
            self.consensus_id,
            round,
            bitmap.count(),
            bitmap
        );
        let artifact = Some(RoundArtifact { signature, bitmap });
        match round {
            Round::Normal => self.round1 = artifact,
            Round::Final => self.round2 = artifact,
        }
    }

    /// Bytes co-signed in `round`: the payload for the normal round,
    /// payload || CS1 || B1 for the final round (None until CS1 exists).
    pub fn message_for_round(&self, round: Round) -> Option<Vec<u8>> {
        match round {
            Round::Normal => Some(self.message_to_cosign.clone()),
            Round::Final => {
                let artifact = self.round1.as_ref()?;
                Some(final_round_message(&self.message_to_cosign, artifact))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // WIRE
    // ─────────────────────────────────────────────────────────────────

    /// Frame `body` as a `msg_type` message of this session and sign it.
    pub fn compose_message<T: Serialize>(
        &self,
        msg_type: ConsensusMessageType,
        body: &T,
    ) -> Result<Vec<u8>> {
        let mut framed = frame_unsigned(
            self.class_byte,
            self.ins_byte,
            msg_type,
            self.consensus_id,
            body,
        )?;
        let signature = self.sign_message(&framed, 0, framed.len());
        framed.extend_from_slice(&signature.to_bytes());
        Ok(framed)
    }

    /// Gate and split an inbound message whose type byte is at `offset`.
    pub fn open<'a>(&self, message: &'a [u8], offset: usize) -> Option<Envelope<'a>> {
        self.admit(message, offset).ok()?;
        let envelope = Envelope::parse(message, offset);
        if envelope.is_none() {
            debug!(
                "[session {}] dropped malformed {}-byte message",
                self.consensus_id,
                message.len()
            );
        }
        envelope
    }

    /// Decode the body and check that it was signed by its claimed sender,
    /// who must be reachable at `from`.
    pub fn authenticate<T: DeserializeOwned + Sender>(
        &self,
        message: &[u8],
        envelope: &Envelope,
        from: &Peer,
    ) -> Option<T> {
        let Some(body) = envelope.decode::<T>() else {
            debug!(
                "[session {}] undecodable {} body",
                self.consensus_id, envelope.msg_type
            );
            return None;
        };
        let sender = body.sender();
        match self.committee.get(sender as usize) {
            Some(member) if member.peer == *from => {}
            _ => {
                debug!(
                    "[session {}] {} from {} claims unknown sender {}",
                    self.consensus_id, envelope.msg_type, from, sender
                );
                return None;
            }
        }
        if !self.verify_message(message, 0, envelope.signed_len, &envelope.signature, sender) {
            warn!(
                "[session {}] bad signature on {} from member {}",
                self.consensus_id, envelope.msg_type, sender
            );
            return None;
        }
        Some(body)
    }

    // ─────────────────────────────────────────────────────────────────
    // SNAPSHOTS
    // ─────────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            consensus_id: self.consensus_id,
            block_number: self.block_number,
            block_hash: self.block_hash.clone(),
            payload: self.message_to_cosign.clone(),
            state: self.state(),
            error_code: self.error_code,
            round1: self.round1.clone(),
            round2: self.round2.clone(),
            challenge: self.challenge_bitmap.clone(),
        }
    }

    /// Replace this session's progress with `snapshot` after checking that
    /// its state and artifacts agree. Commit secrets are never persisted, so
    /// any pending one is dropped.
    pub fn restore(&mut self, snapshot: SessionSnapshot) -> Result<()> {
        if snapshot.consensus_id != self.consensus_id {
            return Err(ConsensusError::ConsensusIdMismatch {
                expected: self.consensus_id,
                found: snapshot.consensus_id,
            });
        }
        snapshot.check_consistency(&self.committee)?;

        info!(
            "[session {}] restored at {} from snapshot",
            self.consensus_id, snapshot.state
        );
        self.block_number = snapshot.block_number;
        self.block_hash = snapshot.block_hash;
        self.message_to_cosign = snapshot.payload;
        self.error_code = snapshot.error_code;
        self.round1 = snapshot.round1;
        self.round2 = snapshot.round2;
        self.challenge_bitmap = snapshot.challenge;
        self.discard_commit();
        self.state.force(snapshot.state);
        Ok(())
    }
}

impl std::fmt::Debug for ConsensusSession {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ConsensusSession")
            .field("consensus_id", &self.consensus_id)
            .field("block_number", &self.block_number)
            .field("my_id", &self.my_id)
            .field("state", &self.state())
            .field("error_code", &self.error_code)
            .finish_non_exhaustive()
    }
}

/// payload || CS1 || B1
pub(crate) fn final_round_message(payload: &[u8], round1: &RoundArtifact) -> Vec<u8> {
    let bitmap = round1.bitmap.to_bytes();
    let mut message = Vec::with_capacity(payload.len() + 64 + bitmap.len());
    message.extend_from_slice(payload);
    message.extend_from_slice(&round1.signature.to_bytes());
    message.extend_from_slice(&bitmap);
    message
}

fn check_complete(quorum: &QuorumBitmap, collected: usize) -> std::result::Result<(), CryptoError> {
    if collected != quorum.bitmap().count() {
        return Err(CryptoError::InvalidLength {
            expected: quorum.bitmap().count(),
            actual: collected,
        });
    }
    Ok(())
}
