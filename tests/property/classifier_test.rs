// tests/property/classifier_test.rs

//! Property-based tests for the status diff → event classifier (spec §4.2,
//! invariant P2: every significant change produces exactly one event).

use clustermon::status::{classify_event, is_significant_change, StatusBits};
use proptest::prelude::*;

/// Only the bits the classifier actually looks at are worth generating —
/// anything outside `ALL_BITS_MASK` (plus the sticky `WAS_MASTER` flag the
/// up-event picker also consults) can never influence significance or
/// classification.
fn arb_relevant_bits() -> impl Strategy<Value = StatusBits> {
    let relevant = StatusBits::ALL_BITS_MASK | StatusBits::WAS_MASTER;
    any::<u64>().prop_map(move |bits| StatusBits::from_bits_truncate(bits) & relevant)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 500,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    /// P2: whenever `is_significant_change` holds, the classifier must name
    /// exactly one event — never `None` (that would be the UNDEFINED case
    /// the spec says must never occur for a significant change).
    #[test]
    fn every_significant_change_yields_an_event(prev in arb_relevant_bits(), present in arb_relevant_bits()) {
        if is_significant_change(prev, present) {
            prop_assert!(
                classify_event(prev, present).is_some(),
                "significant change prev={prev:?} present={present:?} produced no event",
            );
        }
    }

    /// An identical snapshot is never significant and never classified.
    #[test]
    fn identical_snapshots_are_never_significant(bits in arb_relevant_bits()) {
        prop_assert!(!is_significant_change(bits, bits));
    }

    /// Crossing into or out of MAINT is never significant, regardless of
    /// what else changed alongside it (P1's "never eventful" guarantee
    /// restated as a diff-predicate property).
    #[test]
    fn maint_transitions_are_never_significant(prev in arb_relevant_bits(), present in arb_relevant_bits()) {
        let maint_flipped = (prev & StatusBits::MAINT) != (present & StatusBits::MAINT);
        if maint_flipped {
            prop_assert!(!is_significant_change(prev, present));
        }
    }
}
