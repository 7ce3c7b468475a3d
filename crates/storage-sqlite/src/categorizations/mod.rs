//! SQLite storage implementation for item categorizations.

mod model;
mod repository;

pub use model::CategorizationDB;
pub use repository::CategorizationRepository;

pub(crate) use repository::upsert_record;
