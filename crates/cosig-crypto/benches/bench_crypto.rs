// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BENCHMARK SUITE — cosig-crypto
//
// Measures performance of signing, verification and aggregation.
// Every consensus message is signed and verified, and the leader aggregates
// one contribution per committee member per phase.
// Run: cargo bench -p cosig-crypto
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use cosig_crypto::{
    aggregate_commits, aggregate_keys, sign, verify, CommitPoint, CommitSecret, KeyPair, PubKey,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

// ─────────────────────────────────────────────────────────────────
// SIGNATURE BENCHMARKS
// ─────────────────────────────────────────────────────────────────

fn bench_sign(c: &mut Criterion) {
    let kp = KeyPair::generate();
    let mut group = c.benchmark_group("crypto/sign");

    for msg_size in [32, 256, 1024, 4096] {
        let message = vec![0xAB; msg_size];
        group.bench_with_input(
            BenchmarkId::new("schnorr", msg_size),
            &message,
            |b, msg| b.iter(|| black_box(sign(msg, &kp.private_key))),
        );
    }
    group.finish();
}

fn bench_verify(c: &mut Criterion) {
    let kp = KeyPair::generate();
    let message = vec![0xCD; 256];
    let sig = sign(&message, &kp.private_key);
    c.bench_function("crypto/verify", |b| {
        b.iter(|| black_box(verify(&message, &sig, &kp.public_key)))
    });
}

// ─────────────────────────────────────────────────────────────────
// AGGREGATION BENCHMARKS
// ─────────────────────────────────────────────────────────────────

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("crypto/aggregate");

    for size in [4usize, 20, 100, 600] {
        let keys: Vec<PubKey> = (0..size).map(|_| KeyPair::generate().public_key).collect();
        let commits: Vec<CommitPoint> =
            (0..size).map(|_| CommitSecret::new().commit_point()).collect();

        group.bench_with_input(BenchmarkId::new("keys", size), &keys, |b, k| {
            b.iter(|| black_box(aggregate_keys(k).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("commits", size), &commits, |b, cm| {
            b.iter(|| black_box(aggregate_commits(cm).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sign, bench_verify, bench_aggregate);
criterion_main!(benches);
