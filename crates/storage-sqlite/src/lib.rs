//! SQLite storage implementation for qtree.
//!
//! This crate provides all database-related functionality using Diesel ORM
//! with SQLite. It implements the repository traits defined in `qtree-core`:
//! - connection pooling and pragmas
//! - embedded Diesel migrations
//! - the node and categorization repositories
//! - the single writer actor every mutation goes through
//!
//! ```text
//! qtree-core (domain, planning)
//!        │  NodeRepositoryTrait / CategorizationRepositoryTrait
//!        ▼
//! storage-sqlite (this crate) ──► WriteHandle ──► SQLite DB
//! ```

pub mod categorizations;
pub mod db;
pub mod errors;
pub mod nodes;
pub mod schema;

#[cfg(test)]
mod sqlite_store_tests;

pub use categorizations::CategorizationRepository;
pub use db::{
    create_pool, get_connection, get_db_path, init, run_migrations, spawn_writer, DbConnection,
    DbPool, WriteHandle,
};
pub use errors::{IntoCore, StorageError};
pub use nodes::NodeRepository;

pub use qtree_core::errors::{DatabaseError, Error, Result};
