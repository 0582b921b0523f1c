//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The runner
//! depends only on these traits, not on concrete implementations.

mod target;

pub use target::MigrationTarget;
