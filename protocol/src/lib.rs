//! The messages we exchange between the versus server and its clients. They will be used consistent
//! across the server and the client.
//!
//! Everything on the duplex connection is a JSON text frame with a `type` discriminator.
//! Inbound frames decode into [`ClientMessage`], outbound frames are built from [`ServerMessage`].
//! The HTTP bodies of the lobby endpoints live here as well.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The query parameter carrying the session credential when the duplex connection is opened.
pub const CREDENTIAL_QUERY_PARAM: &str = "token";

/// How many leaderboard entries we return if the client does not ask for a specific amount.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

/// The largest leaderboard a client may request.
pub const MAX_LEADERBOARD_LIMIT: usize = 100;

/// The board and counters of one player, as reported by its client and relayed to the opponent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardState {
    /// The playing field, row by row. Cells hold small piece ids, 0 is empty.
    pub board: Vec<Vec<u8>>,
    /// The live score of the reporting player.
    pub score: u64,
    /// The current level.
    pub level: u32,
    /// The amount of cleared lines.
    pub lines: u32,
}

// Client -> Server.

/// Everything a client may send over its duplex connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A single input, relayed verbatim to the opponent.
    #[serde(rename_all = "camelCase")]
    GameMove { move_type: String },
    /// A full board snapshot. Updates the sender's score before it gets relayed.
    GameState(BoardState),
    /// The sender signals that it has lost the given game.
    #[serde(rename_all = "camelCase")]
    GameOver { game_id: String },
    /// The sender wants to play the last finished game again.
    RematchRequest,
    /// Keep alive.
    Ping,
}

// Server -> Client.

/// Everything the server sends over a duplex connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent to both players once they have been paired.
    #[serde(rename_all = "camelCase")]
    MatchFound {
        game_id: String,
        seed: u64,
        opponent: String,
        opponent_id: String,
    },
    /// The opponent's input.
    #[serde(rename_all = "camelCase")]
    GameMove { move_type: String },
    /// The opponent's board.
    GameState(BoardState),
    /// The final result. `winner_id` is empty if nobody won.
    #[serde(rename_all = "camelCase")]
    GameOver {
        game_id: String,
        winner_id: String,
        player1_score: u64,
        player2_score: u64,
    },
    /// One of the two players has topped out, its score is frozen from now on.
    #[serde(rename_all = "camelCase")]
    PlayerLost {
        game_id: String,
        player_id: String,
        loser_score: u64,
    },
    /// The opponent asks for a rematch.
    RematchRequest,
    /// Both players agreed, a fresh game starts right away.
    #[serde(rename_all = "camelCase")]
    RematchStart { game_id: String, seed: u64 },
    /// The opponent dropped its connection, the receiver wins by forfeit.
    OpponentDisconnected { message: String },
    /// Answer to [`ClientMessage::Ping`].
    Pong,
}

// HTTP bodies.

/// Body of the login request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

/// Body of a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub player_id: String,
    pub username: String,
    pub session_token: String,
}

/// Where a player stands in the matchmaking queue. `position` is -1 if not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatusResponse {
    pub position: i64,
    pub in_queue: bool,
}

impl QueueStatusResponse {
    /// Builds the response from a zero based position.
    pub fn from_position(position: Option<usize>) -> Self {
        match position {
            Some(index) => QueueStatusResponse {
                position: index as i64,
                in_queue: true,
            },
            None => QueueStatusResponse {
                position: -1,
                in_queue: false,
            },
        }
    }
}

/// One row of the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// 1 based rank.
    pub rank: usize,
    pub username: String,
    pub high_score: u64,
    pub total_games: u32,
    pub wins: u32,
    pub losses: u32,
}

/// Answer of the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` or `unhealthy`.
    pub status: String,
    /// RFC 3339 time stamp.
    pub timestamp: String,
    pub version: String,
    /// Name of the checked component -> `ok` or the error.
    pub checks: BTreeMap<String, String>,
    pub websocket_connections: usize,
}

/// Answer of the metrics endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub websocket_connections: usize,
    pub uptime_secs: u64,
    /// RFC 3339 time stamp.
    pub timestamp: String,
}
