//! Application state shared by all handlers

use std::sync::Arc;

use chatdesk_billing::UsageMeter;
use chatdesk_shared::PgChatStore;
use sqlx::PgPool;

use crate::config::Config;
use crate::inference::InferenceClient;
use crate::websocket::{Broadcaster, RedisBroadcaster, RoomManager, SessionEngine};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub inference: InferenceClient,
    pub sessions: SessionEngine,
}

impl AppState {
    /// Wire the production collaborators around an open pool.
    ///
    /// Uses Redis broadcast groups when `REDIS_URL` is configured, in-process
    /// rooms otherwise.
    pub async fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let inference = InferenceClient::new(config.inference_config());

        let broadcaster: Arc<dyn Broadcaster> = match &config.redis_url {
            Some(url) => Arc::new(RedisBroadcaster::connect(url).await?),
            None => {
                tracing::info!("REDIS_URL not set; using in-process broadcast rooms");
                Arc::new(RoomManager::new())
            }
        };

        let sessions = SessionEngine::new(
            Arc::new(PgChatStore::new(pool.clone())),
            Arc::new(inference.clone()),
            Arc::new(UsageMeter::new(pool.clone())),
            broadcaster,
            config.session_config(),
        );

        Ok(Self {
            pool,
            config: Arc::new(config),
            inference,
            sessions,
        })
    }
}
