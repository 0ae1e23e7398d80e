//! Broadcast groups keyed by conversation id
//!
//! Sessions publish through [`Broadcaster`] and never touch another
//! connection directly. [`super::room::RoomManager`] serves a single process;
//! [`RedisBroadcaster`] relays events between processes over Redis pub/sub.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::AsyncCommands;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use uuid::Uuid;

use super::connection::Connection;
use super::events::ServerEvent;
use super::room::RoomManager;

/// Redis channel prefix for conversation events
const CHANNEL_PREFIX: &str = "chatdesk:conversation:";

/// Upper bound on the wait between relay resubscribe attempts
const RELAY_MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Publish/subscribe fan-out for conversation events
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Attach a connection to the conversation's group
    async fn subscribe(&self, conversation_id: Uuid, conn: Arc<Connection>)
        -> Result<(), BroadcastError>;

    /// Detach a connection; unknown ids are ignored
    async fn unsubscribe(&self, conversation_id: &Uuid, session_id: &Uuid);

    /// Deliver an event to every connection in the group
    async fn publish(&self, conversation_id: &Uuid, event: ServerEvent)
        -> Result<(), BroadcastError>;
}

/// Membership of one connection in one broadcast group.
///
/// Released exactly once: explicitly through [`Subscription::release`], or on
/// drop if the owner never got that far.
pub struct Subscription {
    broadcaster: Arc<dyn Broadcaster>,
    conversation_id: Uuid,
    session_id: Uuid,
    released: AtomicBool,
}

impl Subscription {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, conversation_id: Uuid, session_id: Uuid) -> Self {
        Self {
            broadcaster,
            conversation_id,
            session_id,
            released: AtomicBool::new(false),
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.broadcaster
            .unsubscribe(&self.conversation_id, &self.session_id)
            .await;
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                session_id = %self.session_id,
                "Subscription dropped outside a runtime; not released"
            );
            return;
        };

        let broadcaster = Arc::clone(&self.broadcaster);
        let conversation_id = self.conversation_id;
        let session_id = self.session_id;
        handle.spawn(async move {
            broadcaster.unsubscribe(&conversation_id, &session_id).await;
        });
    }
}

/// Broadcaster that fans out across processes through Redis pub/sub.
///
/// Publishing goes to Redis only. Each process keeps one relay task per
/// conversation that has local subscribers and forwards what it receives to
/// its local room, so the publisher's own connections are served by the same
/// path as everyone else's.
pub struct RedisBroadcaster {
    client: redis::Client,
    publisher: ConnectionManager,
    local: RoomManager,
    relays: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl RedisBroadcaster {
    pub async fn connect(redis_url: &str) -> Result<Self, BroadcastError> {
        let client = redis::Client::open(redis_url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;

        tracing::info!("Connected to Redis for conversation broadcast");

        Ok(Self {
            client,
            publisher,
            local: RoomManager::new(),
            relays: Mutex::new(HashMap::new()),
        })
    }

    fn channel(conversation_id: &Uuid) -> String {
        format!("{CHANNEL_PREFIX}{conversation_id}")
    }

    async fn start_relay(&self, conversation_id: Uuid) -> Result<JoinHandle<()>, BroadcastError> {
        let pubsub = open_pubsub(&self.client, &Self::channel(&conversation_id)).await?;
        let client = self.client.clone();
        let local = self.local.clone();
        Ok(tokio::spawn(relay(client, pubsub, conversation_id, local)))
    }
}

async fn open_pubsub(client: &redis::Client, channel: &str) -> Result<PubSub, BroadcastError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    Ok(pubsub)
}

/// Forward a conversation channel into the local room.
///
/// Runs until aborted. When the pub/sub stream ends the channel is
/// resubscribed with backoff; events published in the gap are lost to live
/// connections but remain in history.
async fn relay(client: redis::Client, mut pubsub: PubSub, conversation_id: Uuid, local: RoomManager) {
    let channel = RedisBroadcaster::channel(&conversation_id);
    loop {
        {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "Unreadable pub/sub payload");
                        continue;
                    }
                };
                match serde_json::from_str::<ServerEvent>(&payload) {
                    Ok(event) => local.broadcast(&conversation_id, event).await,
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "Dropping undecodable event")
                    }
                }
            }
        }
        tracing::warn!(channel = %channel, "Relay stream ended, resubscribing");

        let strategy = ExponentialBackoff::from_millis(2)
            .factor(50)
            .max_delay(RELAY_MAX_BACKOFF);
        pubsub = match Retry::spawn(strategy, || async {
            open_pubsub(&client, &channel).await.map_err(|e| {
                tracing::warn!(channel = %channel, error = %e, "Relay resubscribe failed");
                e
            })
        })
        .await
        {
            Ok(pubsub) => pubsub,
            Err(e) => {
                tracing::error!(channel = %channel, error = %e, "Relay gave up");
                return;
            }
        };
        tracing::info!(channel = %channel, "Relay resubscribed");
    }
}

#[async_trait]
impl Broadcaster for RedisBroadcaster {
    async fn subscribe(
        &self,
        conversation_id: Uuid,
        conn: Arc<Connection>,
    ) -> Result<(), BroadcastError> {
        // Lock order: relays, then rooms
        let mut relays = self.relays.lock().await;
        let running = relays
            .get(&conversation_id)
            .is_some_and(|relay| !relay.is_finished());
        if !running {
            let relay = self.start_relay(conversation_id).await?;
            relays.insert(conversation_id, relay);
        }
        self.local.join(conversation_id, conn).await;
        Ok(())
    }

    async fn unsubscribe(&self, conversation_id: &Uuid, session_id: &Uuid) {
        let mut relays = self.relays.lock().await;
        self.local.leave(conversation_id, session_id).await;

        if self.local.get_room_size(conversation_id).await == 0 {
            if let Some(relay) = relays.remove(conversation_id) {
                relay.abort();
                tracing::debug!(conversation_id = %conversation_id, "Stopped conversation relay");
            }
        }
    }

    async fn publish(&self, conversation_id: &Uuid, event: ServerEvent) -> Result<(), BroadcastError> {
        let payload = serde_json::to_string(&event)?;
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(Self::channel(conversation_id), payload).await?;

        tracing::debug!(
            conversation_id = %conversation_id,
            receivers = receivers,
            "Published conversation event"
        );
        Ok(())
    }
}

impl Drop for RedisBroadcaster {
    fn drop(&mut self) {
        for (_, relay) in self.relays.get_mut().drain() {
            relay.abort();
        }
    }
}
