//! Step definitions for Cucumber scenarios

pub mod common_steps;
pub mod reconciliation_steps;
pub mod suggestion_steps;
