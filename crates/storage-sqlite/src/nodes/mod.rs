//! SQLite storage implementation for category nodes.

mod model;
mod repository;

pub use model::{CategoryNodeChangesetDB, CategoryNodeDB, NewCategoryNodeDB};
pub use repository::NodeRepository;
