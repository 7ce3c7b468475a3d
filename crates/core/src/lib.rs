//! QTree Core - the hierarchical category tree engine.
//!
//! This crate holds the domain models, the pure planning logic behind every
//! structural mutation, and the services that drive it. It is database-agnostic
//! and defines repository traits that are implemented by the `storage-sqlite`
//! crate.

pub mod categorization;
pub mod config;
pub mod errors;
pub mod tree;

pub use config::TreeConfig;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
