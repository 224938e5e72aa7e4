// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// COSIG - MESSAGE GATE
//
// First filter on every inbound consensus message. Checks only what can be
// checked without decoding the body: size bounds, the consensus ID and
// whether the session is still open. A rejection never touches session state.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use log::debug;

use crate::message::CONSENSUS_ID_LEN;
use crate::state::State;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateRejection {
    #[error("message of {len} bytes too short, need {needed}")]
    TooShort { len: usize, needed: usize },

    #[error("message of {len} bytes exceeds limit {max}")]
    TooLarge { len: usize, max: usize },

    #[error("consensus id {found} does not match session {expected}")]
    WrongConsensusId { expected: u32, found: u32 },

    #[error("session already in terminal state {0}")]
    SessionClosed(State),
}

/// Proof that a message passed the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted {
    pub consensus_id: u32,
}

#[derive(Debug, Clone)]
pub struct MessageGate {
    consensus_id: u32,
    max_message_bytes: usize,
}

impl MessageGate {
    pub fn new(consensus_id: u32, max_message_bytes: usize) -> Self {
        Self {
            consensus_id,
            max_message_bytes,
        }
    }

    pub fn consensus_id(&self) -> u32 {
        self.consensus_id
    }

    /// Big-endian u32 at `offset`, if the message is long enough.
    pub fn read_consensus_id(message: &[u8], offset: usize) -> Option<u32> {
        let end = offset.checked_add(CONSENSUS_ID_LEN)?;
        let raw = message.get(offset..end)?;
        Some(u32::from_be_bytes(raw.try_into().ok()?))
    }

    /// Run all gate checks. `offset` points at the consensus ID.
    pub fn admit(
        &self,
        message: &[u8],
        offset: usize,
        state: State,
    ) -> Result<Admitted, GateRejection> {
        let result = self.check(message, offset, state);
        if let Err(rejection) = &result {
            debug!(
                "[gate {}] dropped {}-byte message: {}",
                self.consensus_id,
                message.len(),
                rejection
            );
        }
        result
    }

    fn check(
        &self,
        message: &[u8],
        offset: usize,
        state: State,
    ) -> Result<Admitted, GateRejection> {
        if message.len() > self.max_message_bytes {
            return Err(GateRejection::TooLarge {
                len: message.len(),
                max: self.max_message_bytes,
            });
        }

        let found = Self::read_consensus_id(message, offset).ok_or(GateRejection::TooShort {
            len: message.len(),
            needed: offset.saturating_add(CONSENSUS_ID_LEN),
        })?;
        if found != self.consensus_id {
            return Err(GateRejection::WrongConsensusId {
                expected: self.consensus_id,
                found,
            });
        }

        if state.is_terminal() {
            return Err(GateRejection::SessionClosed(state));
        }

        Ok(Admitted {
            consensus_id: found,
        })
    }
}
