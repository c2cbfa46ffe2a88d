//! In-memory implementations of the store contracts. Single process only.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::ServerError;
use crate::model::{Player, PlayerId, Session, SessionId};
use crate::storage::{HealthCheck, PlayerStore, QueueStore, SessionStore};

/// The player table plus its two secondary indices.
#[derive(Default)]
struct PlayerTables {
    players: HashMap<PlayerId, Player>,
    /// credential -> player id
    by_credential: HashMap<String, PlayerId>,
    /// username -> player id
    by_username: HashMap<String, PlayerId>,
}

/// In-memory player storage.
#[derive(Default)]
pub struct MemoryPlayerStore {
    tables: RwLock<PlayerTables>,
}

impl MemoryPlayerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlayerStore for MemoryPlayerStore {
    async fn create(&self, player: Player) -> Result<(), ServerError> {
        let mut tables = self.tables.write().await;
        if tables.players.contains_key(&player.id) {
            return Err(ServerError::conflict("player", &player.id));
        }
        if tables.by_username.contains_key(&player.username) {
            return Err(ServerError::UsernameInUse(player.username));
        }
        tables
            .by_credential
            .insert(player.credential.clone(), player.id.clone());
        tables
            .by_username
            .insert(player.username.clone(), player.id.clone());
        tables.players.insert(player.id.clone(), player);
        Ok(())
    }

    async fn get(&self, id: &PlayerId) -> Result<Player, ServerError> {
        let tables = self.tables.read().await;
        tables
            .players
            .get(id)
            .cloned()
            .ok_or_else(|| ServerError::not_found("player", id))
    }

    async fn get_by_username(&self, username: &str) -> Result<Player, ServerError> {
        let tables = self.tables.read().await;
        tables
            .by_username
            .get(username)
            .and_then(|id| tables.players.get(id))
            .cloned()
            .ok_or_else(|| ServerError::not_found("player", username))
    }

    async fn get_by_credential(&self, credential: &str) -> Result<Player, ServerError> {
        let tables = self.tables.read().await;
        tables
            .by_credential
            .get(credential)
            .and_then(|id| tables.players.get(id))
            .cloned()
            // Never echo the credential into logs or responses.
            .ok_or_else(|| ServerError::not_found("player", "with given credential"))
    }

    async fn update(&self, player: Player) -> Result<(), ServerError> {
        let mut tables = self.tables.write().await;
        let Some(stored) = tables.players.get_mut(&player.id) else {
            return Err(ServerError::not_found("player", &player.id));
        };
        // Identity fields are fixed at login.
        if stored.username != player.username || stored.credential != player.credential {
            return Err(ServerError::InvalidRequest {
                reason: format!("username and credential of player {} are immutable", player.id),
            });
        }
        *stored = player;
        Ok(())
    }

    async fn delete(&self, id: &PlayerId) -> Result<Player, ServerError> {
        let mut tables = self.tables.write().await;
        let Some(player) = tables.players.remove(id) else {
            return Err(ServerError::not_found("player", id));
        };
        tables.by_credential.remove(&player.credential);
        tables.by_username.remove(&player.username);
        Ok(player)
    }

    async fn list(&self) -> Result<Vec<Player>, ServerError> {
        let tables = self.tables.read().await;
        Ok(tables.players.values().cloned().collect())
    }
}

#[async_trait]
impl HealthCheck for MemoryPlayerStore {
    async fn check(&self) -> Result<(), ServerError> {
        // In process tables are reachable as long as we can take the lock.
        let _tables = self.tables.read().await;
        Ok(())
    }
}

/// In-memory session storage.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: Session) -> Result<(), ServerError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(ServerError::conflict("session", &session.id));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Session, ServerError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| ServerError::not_found("session", id))
    }

    async fn update(&self, session: Session) -> Result<(), ServerError> {
        let mut sessions = self.sessions.write().await;
        let Some(stored) = sessions.get_mut(&session.id) else {
            return Err(ServerError::not_found("session", &session.id));
        };
        *stored = session;
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), ServerError> {
        let mut sessions = self.sessions.write().await;
        sessions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ServerError::not_found("session", id))
    }

    async fn list_active(&self) -> Result<Vec<Session>, ServerError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|session| !session.is_finished())
            .cloned()
            .collect())
    }

    async fn list(&self) -> Result<Vec<Session>, ServerError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.values().cloned().collect())
    }
}

/// In-memory matchmaking queue.
#[derive(Default)]
pub struct MemoryQueueStore {
    queue: RwLock<Vec<PlayerId>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn add(&self, player_id: &PlayerId) -> Result<(), ServerError> {
        let mut queue = self.queue.write().await;
        if !queue.contains(player_id) {
            queue.push(player_id.clone());
        }
        Ok(())
    }

    async fn remove(&self, player_id: &PlayerId) -> Result<(), ServerError> {
        let mut queue = self.queue.write().await;
        queue.retain(|queued| queued != player_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PlayerId>, ServerError> {
        Ok(self.queue.read().await.clone())
    }

    async fn position(&self, player_id: &PlayerId) -> Result<Option<usize>, ServerError> {
        let queue = self.queue.read().await;
        Ok(queue.iter().position(|queued| queued == player_id))
    }
}
