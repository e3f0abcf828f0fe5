//! Integration test infrastructure for tunnel adapter setup
//!
//! Provides:
//! - A recording fake host implementing every collaborator trait
//! - Pulled configuration fixtures
//! - Journal verification helpers

pub mod fake_host;
pub mod fixtures;
mod verification;

pub use fake_host::{Event, FakeHost};
pub use fixtures::*;
pub use verification::*;
