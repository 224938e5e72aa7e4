// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PROPERTY-BASED TESTS — cosig-consensus
//
// Verifies session invariants for arbitrary committees and message orders:
// - Quorum size formula and bounds
// - Forward-only state transitions, explicit recovery
// - Foreign consensus IDs never admitted
// - Collectors close exactly once and never aggregate late arrivals
// - Full leader/backup runs produce CS1 and CS2 that verify, CS1 unaffected
//   by the final round
//
// Run: cargo test --release -p cosig-consensus --test prop_session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use cosig_consensus::{
    num_for_consensus, Admission, Committee, ConsensusBackup, ConsensusConfig, ConsensusErrorCode,
    ConsensusLeader, ConsensusRole, ConsensusSession, Contributions, Peer, SessionParams, State,
    TYPE_OFFSET,
};
use cosig_crypto::{aggregate_keys, verify, KeyPair};
use proptest::prelude::*;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

fn accept_all(_: &[u8]) -> Result<(), ConsensusErrorCode> {
    Ok(())
}

fn seeded_keys(n: usize) -> Vec<KeyPair> {
    (0..n)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[..8].copy_from_slice(&(i as u64 + 1).to_le_bytes());
            KeyPair::from_seed(&seed)
        })
        .collect()
}

fn committee_of(keys: &[KeyPair]) -> Arc<Committee> {
    let members = keys
        .iter()
        .enumerate()
        .map(|(i, kp)| {
            let addr: SocketAddr = format!("10.0.0.{}:7000", i + 1).parse().unwrap();
            (kp.public_key, Peer::new(addr))
        })
        .collect();
    Arc::new(Committee::new(members).unwrap())
}

fn session(
    keys: &[KeyPair],
    committee: &Arc<Committee>,
    my_id: u16,
    consensus_id: u32,
    payload: Vec<u8>,
) -> ConsensusSession {
    ConsensusSession::new(
        SessionParams {
            consensus_id,
            block_number: 1,
            block_hash: vec![0x11; 32],
            my_id,
            private_key: keys[my_id as usize].private_key.clone(),
            committee: Arc::clone(committee),
            message_to_cosign: payload,
        },
        &ConsensusConfig::default(),
    )
    .unwrap()
}

/// Drive leader 0 and n-1 backups to completion over an in-memory queue.
fn run_to_completion(n: usize, payload: Vec<u8>) -> Vec<Box<dyn ConsensusRole>> {
    let keys = seeded_keys(n);
    let committee = committee_of(&keys);
    let mut leader = ConsensusLeader::new(session(&keys, &committee, 0, 9, payload));
    assert!(leader.start_consensus());

    let mut nodes: Vec<Box<dyn ConsensusRole>> = vec![Box::new(leader)];
    for i in 1..n {
        let s = session(&keys, &committee, i as u16, 9, Vec::new());
        let backup = ConsensusBackup::new(s, 0, Box::new(accept_all)).unwrap();
        nodes.push(Box::new(backup));
    }

    type Queue = VecDeque<(usize, Peer, Vec<u8>)>;
    let mut queue = Queue::new();
    let pump = |nodes: &mut Vec<Box<dyn ConsensusRole>>, queue: &mut Queue| {
        for (i, node) in nodes.iter_mut().enumerate() {
            let from = committee.member(i).peer;
            for out in node.drain_outbound() {
                for to in out.to {
                    let idx = committee.iter().position(|m| m.peer == to).unwrap();
                    queue.push_back((idx, from, out.bytes.clone()));
                }
            }
        }
    };
    pump(&mut nodes, &mut queue);
    while let Some((to, from, bytes)) = queue.pop_front() {
        nodes[to].process_message(&bytes, TYPE_OFFSET, &from);
        pump(&mut nodes, &mut queue);
    }
    nodes
}

// ─────────────────────────────────────────────────────────────────
// QUORUM PROPERTIES
// ─────────────────────────────────────────────────────────────────

proptest! {
    /// PROPERTY: Quorum is the smallest count strictly above 0.667n
    #[test]
    fn prop_quorum_formula(n in 1usize..=10_000) {
        let q = num_for_consensus(n);
        prop_assert_eq!(q, n * 667 / 1000 + 1);
        prop_assert!(q * 1000 > n * 667);
        prop_assert!((q - 1) * 1000 <= n * 667);
    }

    /// PROPERTY: Quorum never exceeds committee size
    #[test]
    fn prop_quorum_bounded(n in 1usize..=10_000) {
        let q = num_for_consensus(n);
        prop_assert!(q >= 1 && q <= n, "quorum {} for n={}", q, n);
    }

    /// PROPERTY: Two quorums always overlap in more than a third of members
    #[test]
    fn prop_quorums_intersect(n in 4usize..=1000) {
        let q = num_for_consensus(n);
        prop_assert!(2 * q > n + n / 3, "n={} q={}", n, q);
    }
}

#[test]
fn test_quorum_reference_values() {
    assert_eq!(num_for_consensus(1), 1);
    assert_eq!(num_for_consensus(4), 3);
    assert_eq!(num_for_consensus(10), 7);
    assert_eq!(num_for_consensus(1000), 668);
}

// ─────────────────────────────────────────────────────────────────
// STATE MACHINE PROPERTIES
// ─────────────────────────────────────────────────────────────────

proptest! {
    /// PROPERTY: Arbitrary transition attempts only ever move one step
    /// forward or into ERROR; COLLECTIVESIG_DONE implies COMMIT_DONE was visited
    #[test]
    fn prop_transitions_forward_only(targets in proptest::collection::vec(0u8..=10, 1..64)) {
        let keys = seeded_keys(4);
        let committee = committee_of(&keys);
        let s = session(&keys, &committee, 0, 1, vec![1]);
        let mut visited = vec![State::Initial];

        for raw in targets {
            let target = State::from_u8(raw).unwrap();
            let before = s.state();
            let moved = s.transition(target);
            let after = s.state();
            if moved {
                prop_assert!(before.can_transition_to(target));
                prop_assert_eq!(after, target);
                visited.push(after);
            } else {
                prop_assert_eq!(after, before);
            }
        }
        if visited.contains(&State::CollectiveSigDone) {
            prop_assert!(visited.contains(&State::CommitDone));
        }
    }

    /// PROPERTY: Recovery lands exactly on the requested state
    #[test]
    fn prop_recover_to_state(from in 0u8..=10, to in 0u8..=10) {
        let keys = seeded_keys(2);
        let committee = committee_of(&keys);
        let s = session(&keys, &committee, 0, 1, vec![1]);
        s.recover_to_state(State::from_u8(from).unwrap());
        s.recover_to_state(State::from_u8(to).unwrap());
        prop_assert_eq!(s.state(), State::from_u8(to).unwrap());
    }

    /// PROPERTY: A message carrying any other consensus ID is never admitted
    #[test]
    fn prop_foreign_id_rejected(
        own in any::<u32>(),
        other in any::<u32>(),
        prefix in proptest::collection::vec(any::<u8>(), 0..8),
    ) {
        prop_assume!(own != other);
        let keys = seeded_keys(2);
        let committee = committee_of(&keys);
        let s = session(&keys, &committee, 0, own, vec![1]);

        let mut msg = prefix.clone();
        msg.extend_from_slice(&other.to_be_bytes());
        prop_assert!(!s.can_process_message(&msg, prefix.len()));

        let mut msg = prefix.clone();
        msg.extend_from_slice(&own.to_be_bytes());
        prop_assert!(s.can_process_message(&msg, prefix.len()));
    }
}

// ─────────────────────────────────────────────────────────────────
// COLLECTOR PROPERTIES
// ─────────────────────────────────────────────────────────────────

proptest! {
    /// PROPERTY: Whatever the arrival order (with repeats), quorum is
    /// reported once, over exactly `threshold` peers, and nothing after it
    /// is aggregated
    #[test]
    fn prop_collector_closes_once(
        n in 1usize..=32,
        arrivals in proptest::collection::vec(0usize..32, 0..96),
    ) {
        let threshold = num_for_consensus(n);
        let mut c: Contributions<usize> = Contributions::new(n, threshold);
        let mut quorum = None;
        for peer in arrivals.into_iter().map(|p| p % n) {
            match c.add(peer, peer) {
                Admission::QuorumReached(q) => {
                    prop_assert!(quorum.is_none(), "quorum reported twice");
                    quorum = Some(q);
                }
                Admission::Late => prop_assert!(quorum.is_some()),
                Admission::Accepted { .. } => prop_assert!(quorum.is_none()),
                Admission::Duplicate => {}
                Admission::NotEligible => prop_assert!(false, "all peers eligible"),
            }
        }
        if let Some(q) = quorum {
            prop_assert_eq!(q.bitmap().count(), threshold);
            let collected = c.collect(&q);
            prop_assert_eq!(collected.len(), threshold);
            for peer in c.late().iter_set() {
                prop_assert!(!q.bitmap().is_set(peer));
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// FULL ROUND PROPERTIES
// ─────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// PROPERTY: Every honest node finishes in DONE with identical CS1/B1 and
    /// CS2/B2; CS1 verifies over the payload and CS2 over payload || CS1 || B1
    #[test]
    fn prop_full_session_signs_both_rounds(
        n in 1usize..=7,
        payload in proptest::collection::vec(any::<u8>(), 1..256),
    ) {
        let nodes = run_to_completion(n, payload.clone());
        let leader = nodes[0].session();
        prop_assert_eq!(leader.state(), State::Done);

        let committee = leader.committee();
        let b1 = leader.b1().unwrap();
        let cs1 = leader.cs1().unwrap();
        let key1 = aggregate_keys(&committee.public_keys_for(b1)).unwrap();
        prop_assert!(verify(&payload, cs1, &key1));

        let mut final_msg = payload.clone();
        final_msg.extend_from_slice(&cs1.to_bytes());
        final_msg.extend_from_slice(&b1.to_bytes());
        let key2 = aggregate_keys(&committee.public_keys_for(leader.b2().unwrap())).unwrap();
        prop_assert!(verify(&final_msg, leader.cs2().unwrap(), &key2));

        for node in &nodes[1..] {
            let s = node.session();
            prop_assert_eq!(s.state(), State::Done);
            prop_assert_eq!(s.cs1(), Some(cs1));
            prop_assert_eq!(s.b1(), Some(b1));
            prop_assert_eq!(s.cs2(), leader.cs2());
        }
    }
}
