//! Shared test utilities for tapedeck integration tests.
//!
//! This module provides:
//! - `TestHarness` with a file-backed database in a temp directory
//! - Fake converters and stores for driving failure paths

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;
