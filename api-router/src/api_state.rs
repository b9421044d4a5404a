use std::sync::Arc;

use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::config::AppConfig,
};
use progress_broadcaster::Broadcaster;
use upload_coordinator::UploadCoordinator;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: Arc<AppConfig>,
    pub storage: Arc<StorageManager>,
    pub coordinator: Arc<UploadCoordinator>,
    pub broadcaster: Arc<Broadcaster>,
}

impl ApiState {
    pub async fn new(
        config: AppConfig,
        storage: Arc<StorageManager>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let surreal_db_client = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );

        surreal_db_client.ensure_initialized().await?;

        let config = Arc::new(config);
        let coordinator = Arc::new(UploadCoordinator::new(
            surreal_db_client.clone(),
            storage.clone(),
            config.clone(),
        ));
        let broadcaster = Arc::new(Broadcaster::new(config.progress_queue_depth));

        Ok(Self {
            db: surreal_db_client,
            config,
            storage,
            coordinator,
            broadcaster,
        })
    }
}
