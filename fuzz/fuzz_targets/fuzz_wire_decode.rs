//! Fuzz target: consensus body and bitmap decoding
//!
//! Feeds arbitrary bytes to every message body decoder, the packed bitmap
//! decoder and the signature parser. Ensures no panics on malformed input.
//!
//! Run: cargo +nightly fuzz run fuzz_wire_decode

#![no_main]
use cosig_consensus::message::{
    AnnounceBody, ChallengeBody, CollectiveSigBody, CommitBody, FailureBody, ResponseBody,
};
use cosig_consensus::ParticipationBitmap;
use cosig_crypto::{CommitPoint, PubKey, Signature};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _: Result<AnnounceBody, _> = bincode::deserialize(data);
    let _: Result<CommitBody, _> = bincode::deserialize(data);
    let _: Result<ResponseBody, _> = bincode::deserialize(data);
    let _: Result<FailureBody, _> = bincode::deserialize(data);

    // Bitmaps from the wire must be usable without panicking.
    if let Ok(body) = bincode::deserialize::<ChallengeBody>(data) {
        let _ = body.bitmap.count();
        let _ = body.aggregated_commit.is_valid();
        let _ = body.aggregated_key.is_valid();
    }
    if let Ok(body) = bincode::deserialize::<CollectiveSigBody>(data) {
        let _ = body.bitmap.iter_set().count();
    }

    if let Some(bitmap) = ParticipationBitmap::from_bytes(data) {
        assert_eq!(ParticipationBitmap::from_bytes(&bitmap.to_bytes()), Some(bitmap));
    }
    let _ = Signature::from_bytes(data);
    let _ = PubKey::from_bytes(data);
    let _ = CommitPoint::from_bytes(data);
});
