//! Test doubles and fixtures.
//!
//! Exposed as a public module so integration tests (and downstream crates
//! wiring up their own agents) can reuse the mock agent instead of
//! re-implementing the trait for every test.

pub mod fixtures;
pub mod mocks;
