// tests/property_test.rs

//! Property-based tests for the monitor core.
//!
//! Mirrors the teacher crate's `tests/property_test.rs` entry point: one file
//! that pulls in a `property` module of per-invariant submodules, each
//! wrapped in its own `proptest!` block.

mod property {
    pub mod classifier_test;
    pub mod journal_test;
}
