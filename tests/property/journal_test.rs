// tests/property/journal_test.rs

//! Property-based tests for the journal codec (spec §4.3, invariants P4/P5).

use clustermon::status::StatusBits;
use proptest::prelude::*;

// journal::{encode,decode,JournalRecord} are crate-internal (pub(crate) is
// not used, but the module itself is `pub mod journal`), so the codec is
// reachable from an integration test the same way any other public item is.
use clustermon::journal::{decode, encode, JournalRecord};

fn arb_status_bits() -> impl Strategy<Value = StatusBits> {
    any::<u64>().prop_map(StatusBits::from_bits_truncate)
}

fn arb_server_name() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_-]{0,31}"
}

fn arb_record() -> impl Strategy<Value = JournalRecord> {
    prop_oneof![
        (arb_server_name(), arb_status_bits())
            .prop_map(|(name, status)| JournalRecord::Server { name, status }),
        arb_server_name().prop_map(|name| JournalRecord::Primary { name }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    /// P4: any snapshot encoded and decoded without corruption round-trips
    /// byte-for-byte equal, record for record, in order.
    #[test]
    fn encode_decode_roundtrips(records in prop::collection::vec(arb_record(), 0..32)) {
        let frame = encode(&records);
        let decoded = decode(&frame).expect("a freshly encoded frame always decodes");
        prop_assert_eq!(decoded, records);
    }

    /// P5: flipping any single byte of a non-empty encoded frame either
    /// leaves it equal (no-op flip) or makes decode fail — it must never
    /// silently decode into a different record set.
    #[test]
    fn single_byte_flip_never_silently_corrupts(
        records in prop::collection::vec(arb_record(), 1..16),
        flip_index in any::<usize>(),
        flip_bits in 1u8..=255u8,
    ) {
        let frame = encode(&records);
        let idx = flip_index % frame.len();
        let mut corrupted = frame.clone();
        corrupted[idx] ^= flip_bits;

        match decode(&corrupted) {
            Ok(decoded) => prop_assert_eq!(decoded, records, "decode must not silently change content"),
            Err(_) => {}
        }
    }

    /// P5: a payload truncated at any point never decodes successfully.
    #[test]
    fn truncated_frame_is_rejected(
        records in prop::collection::vec(arb_record(), 1..16),
        cut in 1usize..64,
    ) {
        let frame = encode(&records);
        prop_assume!(cut < frame.len());
        let truncated = &frame[..frame.len() - cut];
        prop_assert!(decode(truncated).is_err());
    }
}
