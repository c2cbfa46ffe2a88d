//! The connection registry: player id -> the one live duplex connection of that player.
//!
//! Membership sits behind its own read/write lock. Writes to a connection are serialized by
//! a lock owned by that connection, so two players can be written to at the same time while
//! a single socket never sees interleaved writers.
//!
//! Every registration gets a registry-unique [`ConnectionId`]. A reader task that ends only
//! releases its own registration, so a reader superseded by a reconnect leaves the newer
//! connection alone.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::SinkExt;
use futures_util::stream::SplitSink;
use protocol::ServerMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::model::PlayerId;

/// Identifies one registration inside the registry.
pub type ConnectionId = u64;

/// Outcome of [`ConnectionRegistry::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The registration was still current and is gone now.
    Released,
    /// A newer connection of the same player is registered and stays.
    Superseded,
    /// Nothing is registered for the player, for example after a failed write.
    Absent,
}

/// Reason sent along with the close frame when a player reconnects.
pub const REPLACED_REASON: &str = "Replaced by a newer connection.";
/// Reason sent along with the close frame on server shutdown.
pub const SHUTDOWN_REASON: &str = "Server is shutting down.";

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection already closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

/// The write half of a duplex channel to one client.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Writes one text frame.
    async fn send_text(&self, payload: &str) -> Result<(), ConnectionError>;

    /// Sends a graceful close signal and shuts the write half down.
    async fn close(&self, reason: &str) -> Result<(), ConnectionError>;
}

/// The write half of an axum web socket.
pub struct WebSocketConnection {
    sender: Mutex<SplitSink<WebSocket, Message>>,
}

impl WebSocketConnection {
    pub fn new(sender: SplitSink<WebSocket, Message>) -> Self {
        WebSocketConnection {
            sender: Mutex::new(sender),
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn send_text(&self, payload: &str) -> Result<(), ConnectionError> {
        let mut sender = self.sender.lock().await;
        sender
            .send(Message::Text(payload.to_owned().into()))
            .await
            .map_err(|err| ConnectionError::Transport(err.to_string()))
    }

    async fn close(&self, reason: &str) -> Result<(), ConnectionError> {
        let mut sender = self.sender.lock().await;
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: reason.to_owned().into(),
        };
        // The peer may already be gone, we still try to shut our half down.
        let _ = sender.send(Message::Close(Some(frame))).await;
        sender
            .close()
            .await
            .map_err(|err| ConnectionError::Transport(err.to_string()))
    }
}

struct Registration {
    id: ConnectionId,
    connection: Arc<dyn Connection>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<PlayerId, Registration>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `connection` as the player's connection. A previous connection of the same
    /// player is swapped out in the same critical section and closed afterwards.
    pub async fn add(&self, player_id: PlayerId, connection: Arc<dyn Connection>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = {
            let mut connections = self.connections.write().await;
            connections.insert(player_id.clone(), Registration { id, connection })
        };

        if let Some(previous) = previous {
            tracing::info!(%player_id, "Replacing existing connection.");
            if let Err(error) = previous.connection.close(REPLACED_REASON).await {
                tracing::debug!(?error, %player_id, "Closing replaced connection failed.");
            }
        }
        tracing::info!(%player_id, connection_id = id, "Connection registered.");
        id
    }

    /// Closes and deregisters the player's connection. Returns false if there was none.
    pub async fn remove(&self, player_id: &PlayerId) -> bool {
        let removed = self.connections.write().await.remove(player_id);
        match removed {
            Some(registration) => {
                if let Err(error) = registration.connection.close(SHUTDOWN_REASON).await {
                    tracing::debug!(?error, %player_id, "Closing removed connection failed.");
                }
                tracing::info!(%player_id, "Connection removed.");
                true
            }
            None => false,
        }
    }

    /// Deregisters the player's connection only if it is still registration `id`.
    pub async fn release(&self, player_id: &PlayerId, id: ConnectionId) -> Release {
        let mut connections = self.connections.write().await;
        match connections.get(player_id) {
            Some(registration) if registration.id == id => {
                connections.remove(player_id);
                Release::Released
            }
            Some(_) => Release::Superseded,
            None => Release::Absent,
        }
    }

    /// Writes `payload` to the player's connection. A missing recipient is a normal runtime
    /// condition and only gets logged; a failed write deregisters the connection.
    /// Returns whether the payload was written.
    pub async fn send(&self, player_id: &PlayerId, payload: &str) -> bool {
        let target = {
            let connections = self.connections.read().await;
            connections
                .get(player_id)
                .map(|registration| (registration.id, registration.connection.clone()))
        };
        let Some((id, connection)) = target else {
            tracing::debug!(%player_id, "No connection for player, message dropped.");
            return false;
        };

        match connection.send_text(payload).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(?error, %player_id, "Failed to send, dropping connection.");
                self.release(player_id, id).await;
                false
            }
        }
    }

    /// Serializes `message` and sends it to the player.
    pub async fn send_message(&self, player_id: &PlayerId, message: &ServerMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(payload) => self.send(player_id, &payload).await,
            Err(error) => {
                tracing::error!(?error, "Failed to serialize server message.");
                false
            }
        }
    }

    /// Best effort send to every registered connection. Returns how many writes succeeded.
    pub async fn broadcast(&self, payload: &str) -> usize {
        let targets: Vec<(PlayerId, ConnectionId, Arc<dyn Connection>)> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .map(|(player_id, registration)| {
                    (
                        player_id.clone(),
                        registration.id,
                        registration.connection.clone(),
                    )
                })
                .collect()
        };

        let mut delivered = 0;
        for (player_id, id, connection) in targets {
            match connection.send_text(payload).await {
                Ok(()) => delivered += 1,
                Err(error) => {
                    tracing::warn!(?error, %player_id, "Broadcast failed, dropping connection.");
                    self.release(&player_id, id).await;
                }
            }
        }
        delivered
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_connected(&self, player_id: &PlayerId) -> bool {
        self.connections.read().await.contains_key(player_id)
    }

    /// Empties the registry in one step and closes every connection with a close frame.
    /// Individual close failures are logged and do not stop the sweep. Returns how many
    /// connections were drained.
    pub async fn shutdown(&self) -> usize {
        let drained: Vec<(PlayerId, Registration)> =
            self.connections.write().await.drain().collect();
        let amount = drained.len();
        for (player_id, registration) in drained {
            if let Err(error) = registration.connection.close(SHUTDOWN_REASON).await {
                tracing::warn!(?error, %player_id, "Closing connection during shutdown failed.");
            }
        }
        tracing::info!(connections = amount, "Connection registry shut down.");
        amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingConnection;

    #[tokio::test]
    async fn second_connection_replaces_and_closes_the_first() {
        let registry = ConnectionRegistry::new();
        let player = PlayerId::from("alice");
        let first = RecordingConnection::new();
        let second = RecordingConnection::new();

        let first_id = registry.add(player.clone(), first.clone()).await;
        let second_id = registry.add(player.clone(), second.clone()).await;
        assert_ne!(first_id, second_id);
        assert!(first.is_closed().await);
        assert!(!second.is_closed().await);
        assert_eq!(registry.count().await, 1);

        assert!(registry.send(&player, "hello").await);
        assert!(first.payloads().await.is_empty());
        assert_eq!(second.payloads().await, ["hello"]);
    }

    #[tokio::test]
    async fn stale_release_keeps_the_newer_connection() {
        let registry = ConnectionRegistry::new();
        let player = PlayerId::from("alice");
        let old_id = registry.add(player.clone(), RecordingConnection::new()).await;
        let new_id = registry.add(player.clone(), RecordingConnection::new()).await;

        assert_eq!(registry.release(&player, old_id).await, Release::Superseded);
        assert!(registry.is_connected(&player).await);
        assert_eq!(registry.release(&player, new_id).await, Release::Released);
        assert!(!registry.is_connected(&player).await);
        assert_eq!(registry.release(&player, new_id).await, Release::Absent);
    }

    #[tokio::test]
    async fn send_to_missing_player_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send(&PlayerId::from("ghost"), "x").await);
    }

    #[tokio::test]
    async fn failed_write_deregisters_the_connection() {
        let registry = ConnectionRegistry::new();
        let player = PlayerId::from("alice");
        let connection = RecordingConnection::new();
        let id = registry.add(player.clone(), connection.clone()).await;
        assert!(registry.send(&player, "x").await);

        connection.set_failing(true);
        assert!(!registry.send(&player, "y").await);
        assert_eq!(registry.count().await, 0);
        // The reader of that connection finds nothing left to release.
        assert_eq!(registry.release(&player, id).await, Release::Absent);
    }

    #[tokio::test]
    async fn remove_tolerates_a_failing_close() {
        let registry = ConnectionRegistry::new();
        let player = PlayerId::from("alice");
        registry.add(player.clone(), RecordingConnection::failing()).await;

        assert!(registry.remove(&player).await);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn broadcast_skips_failures_and_reaches_the_rest() {
        let registry = ConnectionRegistry::new();
        let healthy = RecordingConnection::new();
        registry.add(PlayerId::from("a"), healthy.clone()).await;
        registry.add(PlayerId::from("b"), RecordingConnection::failing()).await;
        let other = RecordingConnection::new();
        registry.add(PlayerId::from("c"), other.clone()).await;

        assert_eq!(registry.broadcast("news").await, 2);
        assert_eq!(healthy.payloads().await, ["news"]);
        assert_eq!(other.payloads().await, ["news"]);
        assert_eq!(registry.count().await, 2);
    }

    #[tokio::test]
    async fn remove_closes_and_reports_presence() {
        let registry = ConnectionRegistry::new();
        let player = PlayerId::from("alice");
        let connection = RecordingConnection::new();
        registry.add(player.clone(), connection.clone()).await;

        assert!(registry.remove(&player).await);
        assert!(connection.is_closed().await);
        assert!(!registry.remove(&player).await);
    }

    #[tokio::test]
    async fn shutdown_drains_everything_despite_close_failures() {
        let registry = ConnectionRegistry::new();
        let closing = RecordingConnection::new();
        registry.add(PlayerId::from("a"), closing.clone()).await;
        registry.add(PlayerId::from("b"), RecordingConnection::failing()).await;

        assert_eq!(registry.shutdown().await, 2);
        assert_eq!(registry.count().await, 0);
        assert!(closing.is_closed().await);
        assert_eq!(closing.close_reason().await.as_deref(), Some(SHUTDOWN_REASON));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_never_exceed_distinct_players() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();
        for round in 0..40 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let player = PlayerId::new(format!("p{}", round % 5));
                registry.add(player, RecordingConnection::new()).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(registry.count().await, 5);
    }
}
