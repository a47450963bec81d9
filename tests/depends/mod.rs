//! Integration tests for dependency declarations
//!
//! These tests verify method watchers through nested objects and bound functions.

// Dependent methods and nested object chains
mod depends_tests;

// Bound functions
mod bind_tests;
