// Typed repository facade
//
// One `Database` handle shared by the runtime, the background services and
// the API layer. Invariants are enforced at the write boundary: timezone
// validation, creator-only job edits, trigger-config coherence.

mod agents;
mod cascade;
mod endpoints;
mod instances;
mod jobs;
mod messages;
mod narratives;
mod social;

use anyhow::Result;
use sqlx::PgPool;

pub use instances::CompletedInstanceInfo;

use crate::store::Store;

#[derive(Clone)]
pub struct Database {
    store: Store,
}

impl Database {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Connect with the configured pool size and verify reachability
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let store = Store::connect(database_url, max_connections).await?;
        store.ping().await?;
        Ok(Self { store })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn pool(&self) -> &PgPool {
        self.store.pool()
    }

    /// Apply the embedded schema migrations
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(self.pool()).await?;
        Ok(())
    }
}
