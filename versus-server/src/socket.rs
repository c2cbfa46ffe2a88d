//! The life of one duplex connection: registration, the sequential read loop and the
//! clean up once the peer is gone.
//!
//! The credential has already been checked by the upgrade handler, so everything here
//! runs on behalf of a known player.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitStream, StreamExt};
use protocol::{ClientMessage, ServerMessage};
use std::sync::Arc;

use crate::app_state::AppState;
use crate::connections::{ConnectionId, Release, WebSocketConnection};
use crate::error::ServerError;
use crate::model::{PlayerId, SessionId};

/// Registers the socket for `player_id` and serves it until the peer disconnects.
pub async fn serve_connection(socket: WebSocket, state: Arc<AppState>, player_id: PlayerId) {
    // By splitting, the registry can write while we keep reading.
    let (sender, receiver) = socket.split();
    let connection_id = state
        .connections
        .add(player_id.clone(), Arc::new(WebSocketConnection::new(sender)))
        .await;

    let reason = read_loop(receiver, &state, &player_id).await;
    tracing::info!(%player_id, reason, "Connection ended.");
    connection_ended(&state, &player_id, connection_id).await;
}

/// Clean up after the reader of registration `connection_id` stopped. The player forfeits
/// its running game unless a newer connection took over.
pub async fn connection_ended(state: &AppState, player_id: &PlayerId, connection_id: ConnectionId) {
    // A failed write may already have dropped the registration, that still is a disconnect.
    if state.connections.release(player_id, connection_id).await == Release::Superseded {
        tracing::debug!(%player_id, "Superseded by a newer connection, game goes on there.");
        return;
    }
    if let Err(err) = state.orchestrator.handle_disconnect(player_id).await {
        tracing::error!(?err, %player_id, "Disconnect handling failed.");
    }
}

/// Processes inbound frames one after the other. Returns why the loop ended.
async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    state: &Arc<AppState>,
    player_id: &PlayerId,
) -> &'static str {
    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => return "Closed by peer.",
            // Pings are answered by axum, binary frames are not part of the protocol.
            Ok(_) => continue,
            Err(err) => {
                tracing::debug!(?err, %player_id, "Read error.");
                return "Connection lost.";
            }
        };

        match state.auth.touch_activity(player_id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => return "Player logged out.",
            Err(err) => tracing::warn!(?err, %player_id, "Failed to record activity."),
        }

        let message = match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(?err, %player_id, "Unparsable client message ignored.");
                continue;
            }
        };

        // Errors stay scoped to this message, the loop keeps running.
        if let Err(err) = dispatch(state, player_id, message).await {
            tracing::warn!(?err, %player_id, "Client message failed.");
        }
    }
    "Connection lost."
}

/// Routes one decoded client message to the orchestrator.
pub async fn dispatch(
    state: &AppState,
    player_id: &PlayerId,
    message: ClientMessage,
) -> Result<(), ServerError> {
    match message {
        ClientMessage::GameMove { move_type } => {
            state.orchestrator.handle_move(player_id, move_type).await
        }
        ClientMessage::GameState(board) => state.orchestrator.handle_state(player_id, board).await,
        ClientMessage::GameOver { game_id } => {
            state
                .orchestrator
                .report_loss(&SessionId::new(game_id), player_id)
                .await
        }
        ClientMessage::RematchRequest => state
            .orchestrator
            .request_rematch(player_id)
            .await
            .map(|_| ()),
        ClientMessage::Ping => {
            state
                .connections
                .send_message(player_id, &ServerMessage::Pong)
                .await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionStatus;
    use crate::testing::{RecordingConnection, TestServer};
    use protocol::BoardState;

    #[tokio::test]
    async fn broken_socket_still_forfeits_after_a_failed_relay() {
        let server = TestServer::new();
        let alice = server.state.auth.login("alice").await.unwrap();
        let alice_conn = RecordingConnection::new();
        let alice_connection_id = server
            .state
            .connections
            .add(alice.id.clone(), alice_conn.clone())
            .await;
        let (bob, bob_conn) = server.login_connected("bob").await;
        let session = server.pair(&alice, &bob).await;

        // Bob's move hits the dead socket first and drops alice's registration.
        alice_conn.set_failing(true);
        let relayed = ClientMessage::GameMove {
            move_type: "left".into(),
        };
        dispatch(&server.state, &bob.id, relayed).await.unwrap();
        assert!(!server.state.connections.is_connected(&alice.id).await);

        connection_ended(&server.state, &alice.id, alice_connection_id).await;

        let stored = server.state.orchestrator.session(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Finished);
        let messages = bob_conn.messages().await;
        assert!(messages.iter().any(|m| matches!(
            m,
            ServerMessage::GameOver { winner_id, .. } if *winner_id == bob.id.to_string()
        )));
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMessage::OpponentDisconnected { .. })));
        let bob_record = server.state.directory.get(&bob.id).await.unwrap();
        assert_eq!(bob_record.current_session, None);
        assert_eq!(bob_record.stats.wins, 1);
    }

    #[tokio::test]
    async fn superseded_reader_does_not_forfeit() {
        let server = TestServer::new();
        let alice = server.state.auth.login("alice").await.unwrap();
        let old_id = server
            .state
            .connections
            .add(alice.id.clone(), RecordingConnection::new())
            .await;
        let (bob, _) = server.login_connected("bob").await;
        let session = server.pair(&alice, &bob).await;
        server
            .state
            .connections
            .add(alice.id.clone(), RecordingConnection::new())
            .await;

        connection_ended(&server.state, &alice.id, old_id).await;

        let stored = server.state.orchestrator.session(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
        assert!(server.state.connections.is_connected(&alice.id).await);
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let server = TestServer::new();
        let (alice, connection) = server.login_connected("alice").await;
        dispatch(&server.state, &alice.id, ClientMessage::Ping).await.unwrap();
        assert_eq!(connection.messages().await, [ServerMessage::Pong]);
    }

    #[tokio::test]
    async fn game_over_from_a_client_reports_its_loss() {
        let server = TestServer::new();
        let (alice, _) = server.login_connected("alice").await;
        let (bob, bob_conn) = server.login_connected("bob").await;
        let session = server.pair(&alice, &bob).await;

        let state = ClientMessage::GameState(BoardState {
            score: 1800,
            ..BoardState::default()
        });
        dispatch(&server.state, &alice.id, state).await.unwrap();
        let state = ClientMessage::GameState(BoardState {
            score: 1500,
            ..BoardState::default()
        });
        dispatch(&server.state, &bob.id, state).await.unwrap();

        let lost = ClientMessage::GameOver {
            game_id: session.id.to_string(),
        };
        dispatch(&server.state, &bob.id, lost).await.unwrap();

        let messages = bob_conn.messages().await;
        assert!(messages.contains(&ServerMessage::PlayerLost {
            game_id: session.id.to_string(),
            player_id: bob.id.to_string(),
            loser_score: 1500,
        }));
        assert_eq!(
            messages.last(),
            Some(&ServerMessage::GameOver {
                game_id: session.id.to_string(),
                winner_id: alice.id.to_string(),
                player1_score: 1800,
                player2_score: 1500,
            })
        );
    }

    #[tokio::test]
    async fn rematch_without_finished_game_is_an_error() {
        let server = TestServer::new();
        let (alice, _) = server.login_connected("alice").await;
        let result = dispatch(&server.state, &alice.id, ClientMessage::RematchRequest).await;
        assert!(result.unwrap_err().is_not_found());
    }
}
