//! Core error types for the category tree engine.
//!
//! This module defines database-agnostic error types. Storage-specific errors
//! (from Diesel, SQLite, etc.) are converted to these types by the storage layer.

use thiserror::Error;

use crate::tree::{ItemId, NodeId};

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the tree engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Input validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Tree operation rejected: {0}")]
    Tree(#[from] TreeError),

    #[error("Invalid configuration value: {0}")]
    InvalidConfigValue(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Stable machine-readable code for structured operation results.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Database(DatabaseError::NotFound(_)) => "NOT_FOUND",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Tree(e) => e.code(),
            Error::InvalidConfigValue(_) => "INVALID_CONFIG",
            Error::Unexpected(_) => "UNEXPECTED",
        }
    }

    /// Returns the tree error, if this is one.
    pub fn as_tree_error(&self) -> Option<&TreeError> {
        match self {
            Error::Tree(e) => Some(e),
            _ => None,
        }
    }
}

/// Structural errors raised by the tree engine.
///
/// Every variant is raised before any write is issued, so a failed operation
/// never leaves the tree partially modified.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("Category node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Parent node {0} not found or deleted")]
    ParentNotFound(NodeId),

    #[error("Code '{0}' is already used by another node")]
    DuplicateCode(String),

    #[error("Moving node {node_id} under {new_parent_id} would create a cycle")]
    CycleDetected { node_id: NodeId, new_parent_id: NodeId },

    #[error("Node {node_id} has {child_count} active children")]
    HasChildren { node_id: NodeId, child_count: usize },

    #[error("Reorder list does not match the children of {parent}: {reason}")]
    ReorderSetMismatch { parent: String, reason: String },

    #[error("Malformed materialized path '{path}': {reason}")]
    MalformedPath { path: String, reason: String },

    #[error("Operation would affect {affected} nodes, exceeding the cap of {cap}")]
    SubtreeTooLarge { affected: usize, cap: usize },

    #[error("Item {item_id} already has a primary categorization at node {node_id}")]
    ItemAlreadyPrimary { item_id: ItemId, node_id: NodeId },

    #[error("Node {0} was modified concurrently; retry the operation")]
    ConcurrentModification(NodeId),
}

impl TreeError {
    pub fn code(&self) -> &'static str {
        match self {
            TreeError::NodeNotFound(_) => "NODE_NOT_FOUND",
            TreeError::ParentNotFound(_) => "PARENT_NOT_FOUND",
            TreeError::DuplicateCode(_) => "DUPLICATE_CODE",
            TreeError::CycleDetected { .. } => "CYCLE_DETECTED",
            TreeError::HasChildren { .. } => "HAS_CHILDREN",
            TreeError::ReorderSetMismatch { .. } => "REORDER_SET_MISMATCH",
            TreeError::MalformedPath { .. } => "MALFORMED_PATH",
            TreeError::SubtreeTooLarge { .. } => "SUBTREE_TOO_LARGE",
            TreeError::ItemAlreadyPrimary { .. } => "ITEM_ALREADY_PRIMARY",
            TreeError::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
        }
    }

    pub fn malformed_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Database-agnostic error type for storage operations.
///
/// This enum uses `String` for all error details, allowing the storage layer
/// to convert storage-specific errors (Diesel, SQLite, etc.) into this format.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish a database connection.
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to create or configure the connection pool.
    #[error("Failed to create database pool: {0}")]
    PoolCreationFailed(String),

    /// A database query failed to execute.
    #[error("Database query failed: {0}")]
    QueryFailed(String),

    /// The requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A unique constraint was violated (e.g., duplicate key).
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// A foreign key constraint was violated.
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// A database transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Database migration failed.
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Internal/unexpected database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

/// Validation errors for user input and data parsing.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Required field '{0}' is missing")]
    MissingField(String),

    #[error("Value for '{field}' must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: String,
        min: f64,
        max: f64,
        value: f64,
    },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Validation(ValidationError::InvalidInput(err.to_string()))
    }
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}
