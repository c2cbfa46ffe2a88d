//! The matchmaking queue and the pairing worker.
//!
//! Joining only appends to the queue and signals the worker. The worker pairs the two
//! oldest entries inside a single critical section, so a queue entry is consumed at most
//! once no matter how many joins race each other.

use protocol::QueueStatusResponse;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::directory::PlayerDirectory;
use crate::error::ServerError;
use crate::model::{Player, PlayerId, Session, SessionId, SessionStatus};
use crate::orchestrator::GameOrchestrator;
use crate::storage::{QueueStore, SessionStore};

pub struct MatchmakingEngine {
    directory: Arc<PlayerDirectory>,
    queue: Arc<dyn QueueStore>,
    sessions: Arc<dyn SessionStore>,
    orchestrator: Arc<GameOrchestrator>,
    /// Held for a whole pairing decision.
    pairing: Mutex<()>,
    queue_changed: Notify,
}

impl MatchmakingEngine {
    pub fn new(
        directory: Arc<PlayerDirectory>,
        queue: Arc<dyn QueueStore>,
        sessions: Arc<dyn SessionStore>,
        orchestrator: Arc<GameOrchestrator>,
    ) -> Self {
        MatchmakingEngine {
            directory,
            queue,
            sessions,
            orchestrator,
            pairing: Mutex::new(()),
            queue_changed: Notify::new(),
        }
    }

    /// Puts the player into the queue. Does nothing if it already plays a session or is
    /// already queued. Pairing happens in the background.
    pub async fn join_queue(&self, player_id: &PlayerId) -> Result<(), ServerError> {
        let player = self.directory.get(player_id).await?;
        if player.current_session.is_some() {
            tracing::debug!(%player_id, "Player is in a session, join ignored.");
            return Ok(());
        }

        // Flag first: once the entry is visible a pairing may clear the flag again.
        self.directory
            .modify(player_id, |player| player.in_queue = true)
            .await?;
        self.queue.add(player_id).await?;
        tracing::info!(%player_id, "Player joined the queue.");
        self.queue_changed.notify_one();
        Ok(())
    }

    pub async fn leave_queue(&self, player_id: &PlayerId) -> Result<(), ServerError> {
        self.queue.remove(player_id).await?;
        self.directory
            .modify(player_id, |player| player.in_queue = false)
            .await?;
        tracing::info!(%player_id, "Player left the queue.");
        Ok(())
    }

    /// Zero based queue position, `None` if not queued.
    pub async fn queue_position(&self, player_id: &PlayerId) -> Result<Option<usize>, ServerError> {
        self.queue.position(player_id).await
    }

    pub async fn queue_status(&self, player_id: &PlayerId) -> Result<QueueStatusResponse, ServerError> {
        Ok(QueueStatusResponse::from_position(
            self.queue_position(player_id).await?,
        ))
    }

    /// One pairing decision: takes the two oldest queued players that can still play,
    /// creates their session and hands it to the orchestrator. Returns the started
    /// session, `None` if fewer than two players were waiting.
    pub async fn try_pair(&self) -> Result<Option<Session>, ServerError> {
        let _pairing = self.pairing.lock().await;

        let mut pair: Vec<Player> = Vec::with_capacity(2);
        for player_id in self.queue.list().await? {
            match self.directory.get(&player_id).await {
                Ok(player) if player.current_session.is_none() => pair.push(player),
                Ok(_) => {
                    tracing::debug!(%player_id, "Queued player already plays, dropped from queue.");
                    self.queue.remove(&player_id).await?;
                }
                Err(err) if err.is_not_found() => {
                    tracing::debug!(%player_id, "Queued player vanished, dropped from queue.");
                    self.queue.remove(&player_id).await?;
                }
                Err(err) => return Err(err),
            }
            if pair.len() == 2 {
                break;
            }
        }
        let [first, second] = match <[Player; 2]>::try_from(pair) {
            Ok(pair) => pair,
            Err(_) => return Ok(None),
        };

        let session = Session::new(&first, &second, SessionStatus::Waiting);
        let stored = async {
            self.queue.remove(&first.id).await?;
            self.queue.remove(&second.id).await?;
            self.sessions.create(session.clone()).await
        };
        if let Err(err) = stored.await {
            tracing::error!(?err, "Failed to store new session, players go back to the queue.");
            self.restore_pair(&first, &second, None).await;
            return Err(err);
        }

        match self.start_pair(&first, &second, &session).await {
            Ok(started) => Ok(Some(started)),
            Err(err) => {
                tracing::error!(?err, session_id = %session.id, "Pairing failed, players go back to the queue.");
                self.restore_pair(&first, &second, Some(&session.id)).await;
                Err(err)
            }
        }
    }

    /// Assigns the stored session to both players and starts it.
    async fn start_pair(&self, first: &Player, second: &Player, session: &Session) -> Result<Session, ServerError> {
        for player in [first, second] {
            self.directory
                .modify(&player.id, |player| {
                    player.in_queue = false;
                    player.current_session = Some(session.id.clone());
                })
                .await?;
        }
        tracing::info!(
            session_id = %session.id,
            player1 = %first.username,
            player2 = %second.username,
            "Players paired."
        );

        self.orchestrator.start_session(&session.id).await
    }

    /// Undoes a failed pairing: drops the stored session, unassigns it and appends both
    /// players at the tail again. Every step runs even if an earlier one failed.
    async fn restore_pair(&self, first: &Player, second: &Player, stored: Option<&SessionId>) {
        if let Some(session_id) = stored {
            if let Err(err) = self.sessions.delete(session_id).await {
                tracing::error!(?err, %session_id, "Cannot drop the unstarted session.");
            }
        }
        for player in [first, second] {
            let restored = self
                .directory
                .modify(&player.id, |player| {
                    player.in_queue = true;
                    if stored.is_some() && player.current_session.as_ref() == stored {
                        player.current_session = None;
                    }
                })
                .await;
            match restored {
                Ok(_) => {}
                // Logged out in the meantime, nothing to put back.
                Err(err) if err.is_not_found() => continue,
                Err(err) => tracing::error!(?err, player_id = %player.id, "Cannot restore the player record."),
            }
            if let Err(err) = self.queue.add(&player.id).await {
                tracing::error!(?err, player_id = %player.id, "Cannot put the player back into the queue.");
            }
        }
    }

    /// Pairs until fewer than two players are left. Returns how many sessions started.
    pub async fn drain_queue(&self) -> usize {
        let mut started = 0;
        loop {
            match self.try_pair().await {
                Ok(Some(_)) => started += 1,
                Ok(None) => return started,
                Err(err) => {
                    tracing::error!(?err, "Pairing attempt failed.");
                    return started;
                }
            }
        }
    }

    /// Spawns the worker that pairs players whenever the queue changed.
    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                engine.queue_changed.notified().await;
                engine.drain_queue().await;
            }
        })
    }
}
