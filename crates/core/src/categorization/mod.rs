//! Categorization module - item to node assignments.

mod categorization_model;
mod categorization_service;
mod categorization_traits;

pub use categorization_model::{Categorization, CategorizationKey, NewCategorization};
pub use categorization_service::CategorizationService;
pub use categorization_traits::{CategorizationRepositoryTrait, CategorizationServiceTrait};
