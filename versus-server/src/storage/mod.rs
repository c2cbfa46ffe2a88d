//! Persistence contracts of the server.
//!
//! The core only talks to these traits, so the in-memory tables in [`memory`] and a shared
//! remote backend are interchangeable. A backend that talks to the network is expected to
//! retry its own calls, the services above never retry.

pub mod memory;

use async_trait::async_trait;

use crate::error::ServerError;
use crate::model::{Player, PlayerId, Session, SessionId};

/// Storage of logged in players.
#[async_trait]
pub trait PlayerStore: Send + Sync {
    /// Stores a new player. Fails with `Conflict` if the id exists and with `UsernameInUse`
    /// if another stored player holds the same username.
    async fn create(&self, player: Player) -> Result<(), ServerError>;

    async fn get(&self, id: &PlayerId) -> Result<Player, ServerError>;

    async fn get_by_username(&self, username: &str) -> Result<Player, ServerError>;

    async fn get_by_credential(&self, credential: &str) -> Result<Player, ServerError>;

    /// Replaces a stored player. Fails with `NotFound` if it is absent.
    async fn update(&self, player: Player) -> Result<(), ServerError>;

    /// Removes a player and frees its username and credential. Returns the removed record.
    async fn delete(&self, id: &PlayerId) -> Result<Player, ServerError>;

    async fn list(&self) -> Result<Vec<Player>, ServerError>;
}

/// Storage of game sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores a new session. Fails with `Conflict` if the id exists.
    async fn create(&self, session: Session) -> Result<(), ServerError>;

    async fn get(&self, id: &SessionId) -> Result<Session, ServerError>;

    /// Replaces a stored session. Fails with `NotFound` if it is absent.
    async fn update(&self, session: Session) -> Result<(), ServerError>;

    async fn delete(&self, id: &SessionId) -> Result<(), ServerError>;

    /// All sessions that are not finished yet (waiting or active).
    async fn list_active(&self) -> Result<Vec<Session>, ServerError>;

    async fn list(&self) -> Result<Vec<Session>, ServerError>;
}

/// The matchmaking queue, strictly FIFO and free of duplicates.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Appends at the tail. Adding an already queued player does nothing.
    async fn add(&self, player_id: &PlayerId) -> Result<(), ServerError>;

    /// Removes the entry if present.
    async fn remove(&self, player_id: &PlayerId) -> Result<(), ServerError>;

    /// The queued players, oldest first.
    async fn list(&self) -> Result<Vec<PlayerId>, ServerError>;

    /// Zero based position, `None` if not queued.
    async fn position(&self, player_id: &PlayerId) -> Result<Option<usize>, ServerError>;
}

/// Liveness check of a storage backend, used by the health endpoint.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<(), ServerError>;
}
