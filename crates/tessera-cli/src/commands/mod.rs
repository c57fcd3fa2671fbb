//! CLI command implementations.

pub mod conditional;
pub mod config;
pub mod stream;

use std::sync::Arc;

use anyhow::{Context, Result};
use tessera_client::memory::{MemoryClient, users_table};
use tessera_client::{ExecutionContext, NetworkClient, Session, WorkerPool};
use tessera_config::{ConfigLoader, TesseraConfig};

/// Loads the validated configuration for `project`.
pub fn load_config(project: &str) -> Result<TesseraConfig> {
    ConfigLoader::new()
        .with_project_dir(project)
        .load()
        .context("Failed to load configuration")
}

/// In-memory store with the demo `users` table, and a session over it.
pub struct Demo {
    pub pool: WorkerPool,
    pub client: Arc<MemoryClient>,
    pub session: Session,
}

impl Demo {
    pub fn new(config: &TesseraConfig) -> Result<Self> {
        let pool = WorkerPool::new(config.client.worker_threads)
            .context("Failed to start worker pool")?;
        let client = Arc::new(MemoryClient::new(&pool));
        client
            .create_table(users_table())
            .context("Failed to create users table")?;

        let context = ExecutionContext::from_config(
            Arc::clone(&client) as Arc<dyn NetworkClient>,
            pool.clone(),
            config,
        );

        Ok(Self {
            pool,
            client,
            session: Session::new(context),
        })
    }
}
