//! The game orchestrator drives sessions through `Waiting -> Active -> Finished`, relays
//! moves and boards between the two participants and settles the results.
//!
//! Every read-modify-write of a session runs under the stripe of its id. The stripe is
//! taken before any player stripe, never the other way round. Notifications go out after
//! the new state has been persisted, so a failed write never leaves a message behind that
//! announces it.

use chrono::Utc;
use protocol::{BoardState, ServerMessage};
use std::sync::Arc;
use std::time::Duration;

use crate::connections::ConnectionRegistry;
use crate::directory::PlayerDirectory;
use crate::error::ServerError;
use crate::locks::StripedLocks;
use crate::model::{PlayerId, Session, SessionId, SessionStatus, Side};
use crate::storage::SessionStore;

/// Text of the `opponent_disconnected` message.
pub const OPPONENT_DISCONNECTED_MESSAGE: &str = "Opponent disconnected - You win!";

pub struct GameOrchestrator {
    sessions: Arc<dyn SessionStore>,
    directory: Arc<PlayerDirectory>,
    connections: Arc<ConnectionRegistry>,
    locks: StripedLocks,
}

impl GameOrchestrator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        directory: Arc<PlayerDirectory>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        GameOrchestrator {
            sessions,
            directory,
            connections,
            locks: StripedLocks::default(),
        }
    }

    pub async fn session(&self, id: &SessionId) -> Result<Session, ServerError> {
        self.sessions.get(id).await
    }

    /// Activates a waiting session and tells both players who they play against.
    pub async fn start_session(&self, session_id: &SessionId) -> Result<Session, ServerError> {
        let session = {
            let _guard = self.locks.lock(session_id.as_str()).await;
            let mut session = self.sessions.get(session_id).await?;
            if session.status != SessionStatus::Waiting {
                return Err(ServerError::InvalidRequest {
                    reason: format!("session {session_id} is not waiting to start"),
                });
            }
            session.status = SessionStatus::Active;
            self.sessions.update(session.clone()).await?;
            session
        };

        for side in Side::BOTH {
            let opponent = session.participant(side.other());
            let message = ServerMessage::MatchFound {
                game_id: session.id.to_string(),
                seed: session.seed,
                opponent: opponent.username.clone(),
                opponent_id: opponent.player_id.to_string(),
            };
            self.connections
                .send_message(&session.participant(side).player_id, &message)
                .await;
        }

        tracing::info!(
            session_id = %session.id,
            seed = session.seed,
            player1 = %session.participant(Side::First).username,
            player2 = %session.participant(Side::Second).username,
            "Session started."
        );
        Ok(session)
    }

    /// Relays a move to the opponent. Moves from players outside a running session are
    /// dropped without an error, they are usually late messages of a finished game.
    pub async fn handle_move(&self, player_id: &PlayerId, move_type: String) -> Result<(), ServerError> {
        let Some(session) = self.running_session_of(player_id).await? else {
            return Ok(());
        };
        let Some(side) = session.side_of(player_id) else {
            return Ok(());
        };
        let opponent = &session.participant(side.other()).player_id;
        self.connections
            .send_message(opponent, &ServerMessage::GameMove { move_type })
            .await;
        Ok(())
    }

    /// Takes over the sender's score, applies the score comeback rule and relays the
    /// board to the opponent.
    pub async fn handle_state(&self, player_id: &PlayerId, state: BoardState) -> Result<(), ServerError> {
        let Some(session_id) = self.directory.get(player_id).await?.current_session else {
            return Ok(());
        };

        let (session, side, game_over) = {
            let _guard = self.locks.lock(session_id.as_str()).await;
            let mut session = match self.sessions.get(&session_id).await {
                Ok(session) => session,
                Err(err) if err.is_not_found() => return Ok(()),
                Err(err) => return Err(err),
            };
            let Some(side) = session.side_of(player_id) else {
                return Ok(());
            };

            let mut game_over = None;
            let participant = session.participant(side);
            // A lost player's score stays frozen.
            if session.status == SessionStatus::Active
                && !participant.lost
                && participant.score != state.score
            {
                session.participant_mut(side).score = state.score;
                match session.comeback_winner() {
                    Some(winner) => {
                        game_over = Some(self.finalize_locked(&mut session, Some(winner)).await?)
                    }
                    None => self.sessions.update(session.clone()).await?,
                }
            }
            (session, side, game_over)
        };

        if session.is_finished() && game_over.is_none() {
            return Ok(());
        }
        let opponent = &session.participant(side.other()).player_id;
        self.connections
            .send_message(opponent, &ServerMessage::GameState(state))
            .await;
        if let Some(game_over) = game_over {
            self.send_to_both(&session, &game_over).await;
        }
        Ok(())
    }

    /// Marks `loser` as lost in the session and freezes its score.
    ///
    /// A second report for the same player, a report for a finished session and a report
    /// from somebody outside the session are ignored.
    pub async fn report_loss(&self, session_id: &SessionId, loser: &PlayerId) -> Result<(), ServerError> {
        let (session, loser_score, game_over) = {
            let _guard = self.locks.lock(session_id.as_str()).await;
            let mut session = self.sessions.get(session_id).await?;
            let Some(side) = session.side_of(loser) else {
                tracing::debug!(%session_id, player_id = %loser, "Loss report from non participant ignored.");
                return Ok(());
            };
            if session.status != SessionStatus::Active || session.participant(side).lost {
                return Ok(());
            }

            session.participant_mut(side).lost = true;
            let loser_score = session.participant(side).score;
            let outcome = if session.both_lost() {
                Some(None)
            } else {
                session.comeback_winner().map(Some)
            };
            let game_over = match outcome {
                Some(winner) => Some(self.finalize_locked(&mut session, winner).await?),
                None => {
                    self.sessions.update(session.clone()).await?;
                    None
                }
            };
            (session, loser_score, game_over)
        };

        tracing::info!(%session_id, player_id = %loser, loser_score, "Player lost.");
        let player_lost = ServerMessage::PlayerLost {
            game_id: session_id.to_string(),
            player_id: loser.to_string(),
            loser_score,
        };
        self.send_to_both(&session, &player_lost).await;
        if let Some(game_over) = game_over {
            self.send_to_both(&session, &game_over).await;
        }
        Ok(())
    }

    /// Awards the running session of a disconnected player to its opponent.
    /// Returns the forfeited session, `None` if the player was in no running session.
    pub async fn handle_disconnect(&self, player_id: &PlayerId) -> Result<Option<SessionId>, ServerError> {
        let candidates: Vec<Session> = self
            .sessions
            .list_active()
            .await?
            .into_iter()
            .filter(|session| session.contains(player_id))
            .collect();

        for candidate in candidates {
            let (session, side, game_over) = {
                let _guard = self.locks.lock(candidate.id.as_str()).await;
                let mut session = match self.sessions.get(&candidate.id).await {
                    Ok(session) => session,
                    Err(err) if err.is_not_found() => continue,
                    Err(err) => return Err(err),
                };
                // Finished by a loss report in the meantime.
                if session.is_finished() {
                    continue;
                }
                let Some(side) = session.side_of(player_id) else {
                    continue;
                };
                let game_over = self.finalize_locked(&mut session, Some(side.other())).await?;
                (session, side, game_over)
            };

            let survivor = &session.participant(side.other()).player_id;
            tracing::info!(
                session_id = %session.id,
                %player_id,
                winner = %survivor,
                "Player disconnected, opponent wins by forfeit."
            );
            self.send_to_both(&session, &game_over).await;
            self.connections
                .send_message(
                    survivor,
                    &ServerMessage::OpponentDisconnected {
                        message: OPPONENT_DISCONNECTED_MESSAGE.to_string(),
                    },
                )
                .await;
            return Ok(Some(session.id));
        }
        Ok(None)
    }

    /// Flags the player's wish to play its most recent finished session again. Once both
    /// players asked, a fresh active session between them is created and returned.
    pub async fn request_rematch(&self, player_id: &PlayerId) -> Result<Option<Session>, ServerError> {
        let latest = self
            .sessions
            .list()
            .await?
            .into_iter()
            .filter(|session| session.is_finished() && session.contains(player_id))
            .max_by_key(|session| session.created_at)
            .ok_or_else(|| ServerError::not_found("finished session of player", player_id))?;

        let _guard = self.locks.lock(latest.id.as_str()).await;
        let mut previous = self.sessions.get(&latest.id).await?;
        let Some(side) = previous.side_of(player_id) else {
            return Ok(None);
        };
        if previous.participant(side).rematch_requested {
            return Ok(None);
        }

        previous.participant_mut(side).rematch_requested = true;
        self.sessions.update(previous.clone()).await?;
        tracing::info!(session_id = %previous.id, %player_id, "Rematch requested.");
        self.connections
            .send_message(
                &previous.participant(side.other()).player_id,
                &ServerMessage::RematchRequest,
            )
            .await;

        if !previous.both_requested_rematch() {
            return Ok(None);
        }

        let rematch = Session::rematch_of(&previous);
        self.sessions.create(rematch.clone()).await?;
        for side in Side::BOTH {
            let participant = &rematch.participant(side).player_id;
            let assigned = self
                .directory
                .modify(participant, |player| {
                    player.current_session = Some(rematch.id.clone())
                })
                .await;
            match assigned {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {
                    tracing::warn!(player_id = %participant, "Rematch participant is gone.")
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(
            session_id = %rematch.id,
            previous = %previous.id,
            seed = rematch.seed,
            "Rematch started."
        );
        let start = ServerMessage::RematchStart {
            game_id: rematch.id.to_string(),
            seed: rematch.seed,
        };
        self.send_to_both(&rematch, &start).await;
        Ok(Some(rematch))
    }

    /// Deletes finished sessions that ended more than `retention` ago.
    /// Returns how many were deleted.
    pub async fn prune_finished(&self, retention: Duration) -> Result<usize, ServerError> {
        let retention = chrono::Duration::from_std(retention).map_err(|err| {
            ServerError::InvalidRequest {
                reason: format!("session retention out of range: {err}"),
            }
        })?;
        let cutoff = Utc::now() - retention;

        let mut pruned = 0;
        for session in self.sessions.list().await? {
            let expired = session.finished_at.is_some_and(|at| at < cutoff);
            if !expired {
                continue;
            }
            let _guard = self.locks.lock(session.id.as_str()).await;
            match self.sessions.delete(&session.id).await {
                Ok(()) => pruned += 1,
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        if pruned > 0 {
            tracing::info!(pruned, "Expired finished sessions.");
        }
        Ok(pruned)
    }

    /// The player's current session, if it is still running.
    async fn running_session_of(&self, player_id: &PlayerId) -> Result<Option<Session>, ServerError> {
        let Some(session_id) = self.directory.get(player_id).await?.current_session else {
            return Ok(None);
        };
        match self.sessions.get(&session_id).await {
            Ok(session) if !session.is_finished() => Ok(Some(session)),
            Ok(_) => Ok(None),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Finishes the session, persists it and books the result on both players.
    /// Must be called with the session's stripe held. Returns the `game_over` message.
    async fn finalize_locked(
        &self,
        session: &mut Session,
        winner: Option<Side>,
    ) -> Result<ServerMessage, ServerError> {
        session.finish();
        self.sessions.update(session.clone()).await?;

        for side in Side::BOTH {
            let participant = session.participant(side);
            let won = winner == Some(side);
            let final_score = participant.score;
            let settled = self
                .directory
                .modify(&participant.player_id, |player| {
                    player.stats.record(won, final_score);
                    if player.current_session.as_ref() == Some(&session.id) {
                        player.current_session = None;
                    }
                })
                .await;
            match settled {
                Ok(_) => {}
                // The player logged out or was swept, there is nobody left to credit.
                Err(err) if err.is_not_found() => {
                    tracing::warn!(player_id = %participant.player_id, session_id = %session.id, "Cannot book result, player is gone.")
                }
                Err(err) => return Err(err),
            }
        }

        let winner_id = winner
            .map(|side| session.participant(side).player_id.to_string())
            .unwrap_or_default();
        let player1_score = session.participant(Side::First).score;
        let player2_score = session.participant(Side::Second).score;
        tracing::info!(
            session_id = %session.id,
            winner = %winner_id,
            player1_score,
            player2_score,
            "Session finished."
        );
        Ok(ServerMessage::GameOver {
            game_id: session.id.to_string(),
            winner_id,
            player1_score,
            player2_score,
        })
    }

    async fn send_to_both(&self, session: &Session, message: &ServerMessage) {
        for side in Side::BOTH {
            self.connections
                .send_message(&session.participant(side).player_id, message)
                .await;
        }
    }
}
