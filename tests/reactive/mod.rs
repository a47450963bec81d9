//! Integration tests for reactive expressions

// Pipelines, laziness and invalidation
mod rx_tests;
