//! Fuzz target: consensus message gate
//!
//! Feeds arbitrary bytes and offsets to the gate and the envelope splitter.
//! Ensures no panics and that nothing with a foreign consensus ID is admitted.
//!
//! Run: cargo +nightly fuzz run fuzz_message_gate

#![no_main]
use arbitrary::Arbitrary;
use cosig_consensus::message::Envelope;
use cosig_consensus::{GateRejection, MessageGate, State};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    consensus_id: u32,
    max_message_bytes: u16,
    offset: u8,
    state: u8,
    message: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let gate = MessageGate::new(input.consensus_id, input.max_message_bytes as usize);
    let state = State::from_u8(input.state % 11).unwrap_or(State::Initial);
    let offset = input.offset as usize;

    match gate.admit(&input.message, offset, state) {
        Ok(admitted) => {
            assert_eq!(admitted.consensus_id, input.consensus_id);
            assert!(!state.is_terminal());
        }
        Err(GateRejection::WrongConsensusId { found, .. }) => {
            assert_ne!(found, input.consensus_id);
        }
        Err(_) => {}
    }

    if let Some(envelope) = Envelope::parse(&input.message, offset) {
        assert!(envelope.signed_len <= input.message.len());
        assert_eq!(
            MessageGate::read_consensus_id(&input.message, offset + 1),
            Some(envelope.consensus_id)
        );
    }
});
