use std::sync::Arc;

use async_trait::async_trait;
use mongodb::{
    bson::doc,
    event::sdam::{SdamEventHandler, ServerHeartbeatFailedEvent, ServerHeartbeatSucceededEvent},
    options::ClientOptions,
    Client, Database,
};
use tracing::debug;

use super::{Store, StoreError};
use crate::{config::StoreConfig, lifecycle::StoreTracker};

/// Forwards driver heartbeats to the lifecycle's store state.
struct StoreMonitor {
    tracker: StoreTracker,
}

impl SdamEventHandler for StoreMonitor {
    fn handle_server_heartbeat_succeeded_event(&self, event: ServerHeartbeatSucceededEvent) {
        self.tracker.heartbeat_ok(&event.server_address.to_string());
    }

    fn handle_server_heartbeat_failed_event(&self, event: ServerHeartbeatFailedEvent) {
        self.tracker
            .heartbeat_failed(&event.server_address.to_string(), &event.failure.to_string());
    }
}

#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    /// Builds the client. No network I/O beyond SRV lookup happens here;
    /// the handshake is [`Store::ping`].
    pub async fn open(config: &StoreConfig, tracker: StoreTracker) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(&config.uri).await?;
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        options.max_pool_size = Some(config.max_pool_size);
        options.server_selection_timeout = Some(config.server_selection_timeout);
        options.sdam_event_handler = Some(Arc::new(StoreMonitor { tracker }));

        let db_name = config
            .database_name(options.default_database.as_deref())
            .to_string();
        let client = Client::with_options(options)?;
        let db = client.database(&db_name);
        debug!(database = %db_name, "store client configured");
        Ok(Self { client, db })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        // Waits for checked-out sessions and cursors; does not cut them off.
        self.client.clone().shutdown().await;
    }
}
