//! Common test utilities and helpers
//!
//! This module provides shared test infrastructure including:
//! - Test fixtures
//! - A mock DDI authority
//! - API test client

#![allow(dead_code)]

pub mod mocks;
pub mod test_app;

pub use fixtures::*;
pub use mocks::*;
pub use test_app::*;
