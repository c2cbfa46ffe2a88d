//! The records the server keeps: players, game sessions and the ids that link them.
//!
//! A [`Session`] only references its players by id (plus a username snapshot for the
//! `match_found` message), it never owns their lifecycle.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Produces `bytes` random bytes as lower case hex.
fn random_hex(bytes: usize) -> String {
    let mut raw = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut raw);
    raw.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Identifies a player while it is logged in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        PlayerId(id.into())
    }

    /// A fresh random 128 bit id.
    pub fn generate() -> Self {
        PlayerId(random_hex(16))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        PlayerId::new(value)
    }
}

/// Identifies a game session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    /// A fresh random 128 bit id.
    pub fn generate() -> Self {
        SessionId(random_hex(16))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        SessionId::new(value)
    }
}

/// A new unguessable session credential (256 bit, hex encoded).
pub fn generate_credential() -> String {
    random_hex(32)
}

/// A new non negative 63 bit seed for the shared piece sequence.
pub fn generate_seed() -> u64 {
    rand::random::<u64>() >> 1
}

/// Cumulative results of a player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub total_games: u32,
    pub wins: u32,
    pub losses: u32,
    pub high_score: u64,
}

impl PlayerStats {
    /// Books one finished game.
    pub fn record(&mut self, won: bool, final_score: u64) {
        self.total_games += 1;
        if won {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.high_score = self.high_score.max(final_score);
    }
}

/// A logged in player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    /// Unique among the currently logged in players, compared case sensitive.
    pub username: String,
    /// The opaque session credential.
    pub credential: String,
    pub in_queue: bool,
    /// The game the player currently takes part in.
    pub current_session: Option<SessionId>,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub stats: PlayerStats,
}

impl Player {
    /// A fresh player with zeroed stats, a new id and a new credential.
    pub fn new(username: impl Into<String>) -> Self {
        let now = Utc::now();
        Player {
            id: PlayerId::generate(),
            username: username.into(),
            credential: generate_credential(),
            in_queue: false,
            current_session: None,
            connected_at: now,
            last_activity_at: now,
            stats: PlayerStats::default(),
        }
    }
}

/// The life cycle of a session: `Waiting -> Active -> Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Active,
    Finished,
}

/// Which of the two participants. `First` is reported as player 1 on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    First,
    Second,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::First, Side::Second];

    pub fn other(self) -> Side {
        match self {
            Side::First => Side::Second,
            Side::Second => Side::First,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::First => 0,
            Side::Second => 1,
        }
    }
}

/// Per player state inside one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub player_id: PlayerId,
    pub username: String,
    /// The live score. Frozen once `lost` is set.
    pub score: u64,
    pub lost: bool,
    pub rematch_requested: bool,
}

impl Participant {
    fn new(player: &Player) -> Self {
        Participant {
            player_id: player.id.clone(),
            username: player.username.clone(),
            score: 0,
            lost: false,
            rematch_requested: false,
        }
    }
}

/// One match between two players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    participants: [Participant; 2],
    /// Never changes after creation. A rematch is a new session.
    pub seed: u64,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Session {
    /// A new session with a fresh id and seed.
    pub fn new(first: &Player, second: &Player, status: SessionStatus) -> Self {
        Session::from_participants(
            [Participant::new(first), Participant::new(second)],
            status,
        )
    }

    /// A new session (fresh id and seed) between the same two players as `previous`.
    pub fn rematch_of(previous: &Session) -> Self {
        let [first, second] = previous.participants.clone().map(|p| Participant {
            score: 0,
            lost: false,
            rematch_requested: false,
            ..p
        });
        Session::from_participants([first, second], SessionStatus::Active)
    }

    fn from_participants(participants: [Participant; 2], status: SessionStatus) -> Self {
        Session {
            id: SessionId::generate(),
            participants,
            seed: generate_seed(),
            status,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn participant(&self, side: Side) -> &Participant {
        &self.participants[side.index()]
    }

    pub fn participant_mut(&mut self, side: Side) -> &mut Participant {
        &mut self.participants[side.index()]
    }

    /// Which side the player plays on, `None` if it is not part of this session.
    pub fn side_of(&self, player_id: &PlayerId) -> Option<Side> {
        Side::BOTH
            .into_iter()
            .find(|side| &self.participant(*side).player_id == player_id)
    }

    pub fn contains(&self, player_id: &PlayerId) -> bool {
        self.side_of(player_id).is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }

    pub fn both_lost(&self) -> bool {
        Side::BOTH.iter().all(|side| self.participant(*side).lost)
    }

    pub fn both_requested_rematch(&self) -> bool {
        Side::BOTH
            .iter()
            .all(|side| self.participant(*side).rematch_requested)
    }

    /// The score comeback rule: exactly one player has lost and the survivor's live score
    /// is strictly above the loser's frozen one.
    pub fn comeback_winner(&self) -> Option<Side> {
        let loser = Side::BOTH
            .into_iter()
            .find(|side| self.participant(*side).lost)?;
        let survivor = self.participant(loser.other());
        if survivor.lost {
            return None;
        }
        (survivor.score > self.participant(loser).score).then_some(loser.other())
    }

    /// Marks the session as finished.
    pub fn finish(&mut self) {
        self.status = SessionStatus::Finished;
        self.finished_at = Some(Utc::now());
    }
}
