//! In-memory fixtures for unit and integration tests.
//!
//! [`RecordingConnection`] stands in for a client socket and keeps everything written to
//! it. [`TestServer`] wires all services on in-memory stores, without any background task.
//! [`FaultyPlayerStore`] and [`FaultySessionStore`] wrap the in-memory stores and fail
//! writes on demand.

use async_trait::async_trait;
use protocol::ServerMessage;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::app_state::{AppState, Stores};
use crate::connections::{Connection, ConnectionError};
use crate::error::ServerError;
use crate::model::{Player, PlayerId, Session, SessionId};
use crate::storage::memory::{MemoryPlayerStore, MemoryQueueStore, MemorySessionStore};
use crate::storage::{PlayerStore, SessionStore};

fn injected(operation: &str) -> ServerError {
    ServerError::Storage {
        reason: format!("injected {operation} failure"),
        source: None,
    }
}

/// A connection that records every payload instead of sending it.
#[derive(Default)]
pub struct RecordingConnection {
    payloads: Mutex<Vec<String>>,
    close_reason: Mutex<Option<String>>,
    closed: AtomicBool,
    failing: AtomicBool,
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A connection whose writes and closes all fail.
    pub fn failing() -> Arc<Self> {
        let connection = Self::default();
        connection.failing.store(true, Ordering::SeqCst);
        Arc::new(connection)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn payloads(&self) -> Vec<String> {
        self.payloads.lock().await.clone()
    }

    /// The recorded payloads decoded as server messages.
    ///
    /// # Panics
    /// If something other than a server message was written.
    pub async fn messages(&self) -> Vec<ServerMessage> {
        self.payloads
            .lock()
            .await
            .iter()
            .map(|payload| {
                serde_json::from_str(payload).expect("recorded payload is a server message")
            })
            .collect()
    }

    pub async fn clear(&self) {
        self.payloads.lock().await.clear();
    }

    pub async fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().await.clone()
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn send_text(&self, payload: &str) -> Result<(), ConnectionError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ConnectionError::Transport("recording connection set to fail".into()));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        self.payloads.lock().await.push(payload.to_owned());
        Ok(())
    }

    async fn close(&self, reason: &str) -> Result<(), ConnectionError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ConnectionError::Transport("recording connection set to fail".into()));
        }
        *self.close_reason.lock().await = Some(reason.to_owned());
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory player store whose updates fail for selected players.
#[derive(Default)]
pub struct FaultyPlayerStore {
    inner: MemoryPlayerStore,
    failing_updates: Mutex<HashSet<PlayerId>>,
}

impl FaultyPlayerStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn fail_updates_for(&self, player_id: &PlayerId) {
        self.failing_updates.lock().await.insert(player_id.clone());
    }

    pub async fn heal(&self) {
        self.failing_updates.lock().await.clear();
    }
}

#[async_trait]
impl PlayerStore for FaultyPlayerStore {
    async fn create(&self, player: Player) -> Result<(), ServerError> {
        self.inner.create(player).await
    }

    async fn get(&self, id: &PlayerId) -> Result<Player, ServerError> {
        self.inner.get(id).await
    }

    async fn get_by_username(&self, username: &str) -> Result<Player, ServerError> {
        self.inner.get_by_username(username).await
    }

    async fn get_by_credential(&self, credential: &str) -> Result<Player, ServerError> {
        self.inner.get_by_credential(credential).await
    }

    async fn update(&self, player: Player) -> Result<(), ServerError> {
        if self.failing_updates.lock().await.contains(&player.id) {
            return Err(injected("player update"));
        }
        self.inner.update(player).await
    }

    async fn delete(&self, id: &PlayerId) -> Result<Player, ServerError> {
        self.inner.delete(id).await
    }

    async fn list(&self) -> Result<Vec<Player>, ServerError> {
        self.inner.list().await
    }
}

/// In-memory session store whose creates and updates can be switched to fail.
#[derive(Default)]
pub struct FaultySessionStore {
    inner: MemorySessionStore,
    failing_creates: AtomicBool,
    failing_updates: AtomicBool,
}

impl FaultySessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing_creates(&self, failing: bool) {
        self.failing_creates.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_updates(&self, failing: bool) {
        self.failing_updates.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for FaultySessionStore {
    async fn create(&self, session: Session) -> Result<(), ServerError> {
        if self.failing_creates.load(Ordering::SeqCst) {
            return Err(injected("session create"));
        }
        self.inner.create(session).await
    }

    async fn get(&self, id: &SessionId) -> Result<Session, ServerError> {
        self.inner.get(id).await
    }

    async fn update(&self, session: Session) -> Result<(), ServerError> {
        if self.failing_updates.load(Ordering::SeqCst) {
            return Err(injected("session update"));
        }
        self.inner.update(session).await
    }

    async fn delete(&self, id: &SessionId) -> Result<(), ServerError> {
        self.inner.delete(id).await
    }

    async fn list_active(&self) -> Result<Vec<Session>, ServerError> {
        self.inner.list_active().await
    }

    async fn list(&self) -> Result<Vec<Session>, ServerError> {
        self.inner.list().await
    }
}

/// Handles to the faulty stores behind a [`TestServer::faulty`].
pub struct Faults {
    pub players: Arc<FaultyPlayerStore>,
    pub sessions: Arc<FaultySessionStore>,
}

/// All services on in-memory stores.
pub struct TestServer {
    pub state: Arc<AppState>,
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}

impl TestServer {
    pub fn new() -> Self {
        TestServer {
            state: Arc::new(AppState::in_memory()),
        }
    }

    /// A server whose player and session stores fail on demand.
    pub fn faulty() -> (Self, Faults) {
        let players = FaultyPlayerStore::new();
        let sessions = FaultySessionStore::new();
        let stores = Stores {
            players: players.clone(),
            sessions: sessions.clone(),
            queue: Arc::new(MemoryQueueStore::new()),
            health: Arc::new(MemoryPlayerStore::new()),
        };
        let server = TestServer {
            state: Arc::new(AppState::new(stores)),
        };
        (server, Faults { players, sessions })
    }

    /// Logs `username` in and registers a recording connection for it.
    ///
    /// # Panics
    /// If the login fails.
    pub async fn login_connected(&self, username: &str) -> (Player, Arc<RecordingConnection>) {
        let player = self
            .state
            .auth
            .login(username)
            .await
            .expect("login of a fresh test player");
        let connection = RecordingConnection::new();
        self.state
            .connections
            .add(player.id.clone(), connection.clone())
            .await;
        (player, connection)
    }

    /// Queues both players and runs one pairing. Returns the started session.
    ///
    /// # Panics
    /// If the two players do not end up in a session together.
    pub async fn pair(&self, first: &Player, second: &Player) -> Session {
        let matchmaking = &self.state.matchmaking;
        matchmaking
            .join_queue(&first.id)
            .await
            .expect("first player joins");
        matchmaking
            .join_queue(&second.id)
            .await
            .expect("second player joins");
        let session = matchmaking
            .try_pair()
            .await
            .expect("pairing succeeds")
            .expect("two players were queued");
        assert!(session.contains(&first.id) && session.contains(&second.id));
        session
    }
}
