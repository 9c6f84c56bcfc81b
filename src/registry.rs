use crate::codec::{self, EncodedFrame, Frame};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// One end of a live socket, as the registry sees it. The server wraps the
/// write half of an accepted WebSocket in this; tests register fakes.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Pushes one encoded frame. Errors mean the socket is gone or broken;
    /// the registry treats them as not-delivered.
    async fn send(&self, frame: EncodedFrame) -> Result<(), anyhow::Error>;

    /// Closes the underlying socket. Idempotent.
    async fn close(&self);
}

/// A registered live connection. One per online user.
pub struct Connection {
    pub sink: Arc<dyn FrameSink>,
    pub generation: u64,
    pub connected_at: DateTime<Utc>,
}

/// The injectable seam between the write path and live delivery. The server
/// setup receives one of these; nothing holds a global.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Binds `user_id` to a live sink, closing and replacing any previous
    /// one (last writer wins). Returns the connection's generation, which
    /// the socket task passes back to [`Registry::unregister`].
    async fn register(&self, user_id: &str, sink: Arc<dyn FrameSink>) -> u64;

    /// Removes the user's connection, but only if it still is the one
    /// identified by `generation`. A replaced socket's deferred close must
    /// not evict its successor.
    async fn unregister(&self, user_id: &str, generation: u64);

    /// Pushes a frame to the user's live connection, if any. Returns whether
    /// a live recipient accepted the frame. Never errors: send failures are
    /// logged and reported as not-delivered. There is no queuing and no
    /// retry; the store remains the durable record.
    async fn route(&self, target_user_id: &str, frame: &Frame) -> bool;

    fn is_online(&self, user_id: &str) -> bool;

    fn connected_users(&self) -> Vec<String>;
}

/// In-process connection registry over a concurrent map. `register`,
/// `unregister` and `route` race across client connect/disconnect tasks,
/// which the map absorbs without an outer lock.
pub struct ConnectionRegistry {
    connections: DashMap<String, Connection>,
    generations: AtomicU64,
    compress: bool,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            generations: AtomicU64::new(0),
            compress: false,
        }
    }

    /// Enables gzip for outbound frames above the codec's size threshold.
    pub fn with_compression(mut self) -> Self {
        self.compress = true;
        self
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for ConnectionRegistry {
    async fn register(&self, user_id: &str, sink: Arc<dyn FrameSink>) -> u64 {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let connection = Connection {
            sink,
            generation,
            connected_at: Utc::now(),
        };
        let displaced = self.connections.insert(user_id.to_string(), connection);
        if let Some(old) = displaced {
            debug!(target: "Registry", "Replacing live connection for {user_id} (gen {} -> {generation})", old.generation);
            old.sink.close().await;
        } else {
            debug!(target: "Registry", "Registered connection for {user_id} (gen {generation})");
        }
        generation
    }

    async fn unregister(&self, user_id: &str, generation: u64) {
        let removed = self
            .connections
            .remove_if(user_id, |_, conn| conn.generation == generation);
        if removed.is_some() {
            debug!(target: "Registry", "Unregistered connection for {user_id} (gen {generation})");
        }
    }

    async fn route(&self, target_user_id: &str, frame: &Frame) -> bool {
        // Clone the sink out of the map entry so no shard lock is held
        // across the send await.
        let sink = match self.connections.get(target_user_id) {
            Some(conn) => conn.sink.clone(),
            None => {
                debug!(target: "Registry", "No live connection for {target_user_id}, dropping {} frame", frame.frame_type.canonical());
                return false;
            }
        };

        let encoded = if self.compress {
            codec::encode_frame_compressed(frame)
        } else {
            EncodedFrame::Text(codec::encode_frame(frame))
        };

        match sink.send(encoded).await {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "Registry", "Send to {target_user_id} failed, treating as not delivered: {e}");
                false
            }
        }
    }

    fn is_online(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    fn connected_users(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}
