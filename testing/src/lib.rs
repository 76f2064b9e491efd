//! # Test Fixtures
//!
//! Shared fixtures for integration tests: a process-wide PostgreSQL
//! container and unique-id helpers. Tests call [`postgres`] and skip
//! themselves when Docker is unavailable, so the suite stays green on
//! machines without a container runtime.

pub mod fixtures;

pub use fixtures::{PostgresFixture, postgres, unique_id, unique_name};
