use std::sync::Arc;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use qtree_core::categorization::{CategorizationService, CategorizationServiceTrait};
use qtree_core::tree::{TreeCoordinator, TreeService, TreeServiceTrait};
use qtree_storage_sqlite::{
    db::{self, write_actor},
    CategorizationRepository, NodeRepository,
};

use crate::config::{Config, LogFormat};

pub struct AppServices {
    pub tree_service: Arc<dyn TreeServiceTrait>,
    pub categorization_service: Arc<dyn CategorizationServiceTrait>,
}

pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr so command output on stdout stays parseable.
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

pub async fn build_services(config: &Config) -> anyhow::Result<AppServices> {
    let db_path = db::init(&config.db_path)?;
    let pool = db::create_pool(&db_path)?;
    db::run_migrations(&pool)?;
    let writer = write_actor::spawn_writer((*pool).clone());
    tracing::debug!("Database ready at {}", db_path);

    let node_repository = Arc::new(NodeRepository::new(pool.clone(), writer.clone()));
    let categorization_repository = Arc::new(CategorizationRepository::new(pool, writer));

    // Both services must share one coordinator so their locks see each other.
    let coordinator = Arc::new(TreeCoordinator::new());

    let tree_service = Arc::new(TreeService::new(
        node_repository.clone(),
        categorization_repository.clone(),
        config.tree.clone(),
        coordinator.clone(),
    ));
    let categorization_service = Arc::new(CategorizationService::new(
        node_repository,
        categorization_repository,
        config.tree.clone(),
        coordinator,
    ));

    Ok(AppServices {
        tree_service,
        categorization_service,
    })
}
