use log::warn;
use serde::Serialize;

use crate::committee::Peer;
use crate::message::ConsensusMessageType;
use crate::session::ConsensusSession;

/// A framed, signed message waiting to be handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: Vec<Peer>,
    pub bytes: Vec<u8>,
}

/// Behaviour shared by the leader and backup roles. The session itself has
/// no message handler; each role decides which messages its state accepts.
pub trait ConsensusRole {
    /// Handle one inbound message whose type byte is at `offset`.
    /// Returns false when the message was dropped or rejected.
    fn process_message(&mut self, message: &[u8], offset: usize, from: &Peer) -> bool;

    fn session(&self) -> &ConsensusSession;

    /// Messages produced since the last call, in send order.
    fn drain_outbound(&mut self) -> Vec<OutboundMessage>;

    /// Failures that can be tolerated before quorum is out of reach.
    fn num_for_consensus_failure(&self) -> usize {
        let session = self.session();
        session.committee().len() - session.quorum_size()
    }
}

/// Compose and queue a message, logging instead of failing if the body
/// cannot be encoded.
pub(crate) fn queue<T: Serialize>(
    session: &ConsensusSession,
    outbound: &mut Vec<OutboundMessage>,
    to: Vec<Peer>,
    msg_type: ConsensusMessageType,
    body: &T,
) -> bool {
    match session.compose_message(msg_type, body) {
        Ok(bytes) => {
            outbound.push(OutboundMessage { to, bytes });
            true
        }
        Err(e) => {
            warn!(
                "[session {}] failed to compose {}: {}",
                session.consensus_id(),
                msg_type,
                e
            );
            false
        }
    }
}
