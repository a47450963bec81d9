//! Integration tests for watchers and event batching
//!
//! These tests verify delivery, batching and flush ordering across owners.

// Batching, fixpoint flushes and queued watchers
mod batching_tests;

// Property tests for batching invariants
mod property_tests;
