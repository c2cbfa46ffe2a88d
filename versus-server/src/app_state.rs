//! The shared application state.
//! It provides:
//! - [`Stores`]: the persistence backends the services run on
//! - [`AppState`]: every service, wired together once and shared by all tasks
//! - the clean up flows that span several services (sign out, inactivity sweep)

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::AuthService;
use crate::connections::ConnectionRegistry;
use crate::directory::PlayerDirectory;
use crate::error::ServerError;
use crate::matchmaking::MatchmakingEngine;
use crate::model::{Player, PlayerId};
use crate::orchestrator::GameOrchestrator;
use crate::storage::memory::{MemoryPlayerStore, MemoryQueueStore, MemorySessionStore};
use crate::storage::{HealthCheck, PlayerStore, QueueStore, SessionStore};

/// The persistence backends.
pub struct Stores {
    pub players: Arc<dyn PlayerStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub queue: Arc<dyn QueueStore>,
    /// Probed by the health endpoint.
    pub health: Arc<dyn HealthCheck>,
}

impl Stores {
    /// Single process tables.
    pub fn in_memory() -> Self {
        let players = Arc::new(MemoryPlayerStore::new());
        Stores {
            players: players.clone(),
            sessions: Arc::new(MemorySessionStore::new()),
            queue: Arc::new(MemoryQueueStore::new()),
            health: players,
        }
    }
}

/// The application state.
pub struct AppState {
    pub auth: AuthService,
    pub directory: Arc<PlayerDirectory>,
    pub matchmaking: Arc<MatchmakingEngine>,
    pub orchestrator: Arc<GameOrchestrator>,
    pub connections: Arc<ConnectionRegistry>,
    pub sessions: Arc<dyn SessionStore>,
    pub queue: Arc<dyn QueueStore>,
    pub health: Arc<dyn HealthCheck>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(stores: Stores) -> Self {
        let directory = Arc::new(PlayerDirectory::new(stores.players));
        let connections = Arc::new(ConnectionRegistry::new());
        let orchestrator = Arc::new(GameOrchestrator::new(
            stores.sessions.clone(),
            directory.clone(),
            connections.clone(),
        ));
        let matchmaking = Arc::new(MatchmakingEngine::new(
            directory.clone(),
            stores.queue.clone(),
            stores.sessions.clone(),
            orchestrator.clone(),
        ));

        AppState {
            auth: AuthService::new(directory.clone()),
            directory,
            matchmaking,
            orchestrator,
            connections,
            sessions: stores.sessions,
            queue: stores.queue,
            health: stores.health,
            started_at: Instant::now(),
        }
    }

    pub fn in_memory() -> Self {
        AppState::new(Stores::in_memory())
    }

    /// Logs the player out: leaves the queue, forfeits a running game, drops the
    /// connection and deletes the record.
    pub async fn sign_out(&self, player_id: &PlayerId) -> Result<Player, ServerError> {
        self.matchmaking.leave_queue(player_id).await?;
        self.orchestrator.handle_disconnect(player_id).await?;
        self.connections.remove(player_id).await;
        self.auth.logout(player_id).await
    }

    /// Deletes every player that was silent for longer than `threshold` and cleans up
    /// after it. Returns how many players were removed.
    pub async fn sweep_inactive(&self, threshold: Duration) -> Result<usize, ServerError> {
        let removed = self.auth.sweep_inactive(threshold).await?;
        for player in &removed {
            self.queue.remove(&player.id).await?;
            if let Err(err) = self.orchestrator.handle_disconnect(&player.id).await {
                tracing::warn!(?err, player_id = %player.id, "Forfeit of swept player failed.");
            }
            self.connections.remove(&player.id).await;
        }
        if !removed.is_empty() {
            tracing::info!(removed = removed.len(), "Inactivity sweep done.");
        }
        Ok(removed.len())
    }
}
