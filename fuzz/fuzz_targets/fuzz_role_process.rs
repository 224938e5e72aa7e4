//! Fuzz target: leader and backup message handling
//!
//! Feeds arbitrary bytes, stamped with the session's consensus ID so they
//! pass the gate, to a leader and a backup. Unsigned garbage must never
//! panic and never move either state machine.
//!
//! Run: cargo +nightly fuzz run fuzz_role_process

#![no_main]
use cosig_consensus::{
    Committee, ConsensusBackup, ConsensusConfig, ConsensusErrorCode, ConsensusLeader,
    ConsensusRole, ConsensusSession, Peer, SessionParams, State, TYPE_OFFSET,
};
use cosig_crypto::KeyPair;
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

const CONSENSUS_ID: u32 = 77;

fn accept_all(_: &[u8]) -> Result<(), ConsensusErrorCode> {
    Ok(())
}

fn session(keys: &[KeyPair], committee: &Arc<Committee>, my_id: u16) -> ConsensusSession {
    ConsensusSession::new(
        SessionParams {
            consensus_id: CONSENSUS_ID,
            block_number: 1,
            block_hash: vec![0; 32],
            my_id,
            private_key: keys[my_id as usize].private_key.clone(),
            committee: Arc::clone(committee),
            message_to_cosign: b"payload".to_vec(),
        },
        &ConsensusConfig::default(),
    )
    .unwrap()
}

fuzz_target!(|data: &[u8]| {
    let keys: Vec<KeyPair> = (1..=4u8).map(|i| KeyPair::from_seed(&[i; 32])).collect();
    let members = keys
        .iter()
        .enumerate()
        .map(|(i, kp)| {
            let addr = format!("127.0.0.1:{}", 9000 + i).parse().unwrap();
            (kp.public_key, Peer::new(addr))
        })
        .collect();
    let committee = Arc::new(Committee::new(members).unwrap());

    let mut leader = ConsensusLeader::new(session(&keys, &committee, 0));
    leader.start_consensus();
    let mut backup =
        ConsensusBackup::new(session(&keys, &committee, 1), 0, Box::new(accept_all)).unwrap();

    let mut message = data.to_vec();
    if message.len() >= TYPE_OFFSET + 5 {
        message[TYPE_OFFSET + 1..TYPE_OFFSET + 5].copy_from_slice(&CONSENSUS_ID.to_be_bytes());
    }

    for i in 0..committee.len() {
        let from = committee.member(i).peer;
        assert!(!leader.process_message(&message, TYPE_OFFSET, &from));
        assert!(!backup.process_message(&message, TYPE_OFFSET, &from));
    }
    assert_eq!(leader.session().state(), State::AnnounceDone);
    assert_eq!(backup.session().state(), State::Initial);
});
