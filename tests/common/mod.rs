//! Shared test utilities for integration tests.
//!
//! This module provides:
//! - Manifest fixtures for a producer/consumer workspace
//! - Adapter registry setup over the in-memory backend
//! - Polling helpers for asynchronous assertions

pub mod fixtures;

pub use fixtures::*;
