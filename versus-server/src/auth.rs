//! Login, credential validation and reclaiming of usernames.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::directory::PlayerDirectory;
use crate::error::ServerError;
use crate::model::{Player, PlayerId};

pub struct AuthService {
    directory: Arc<PlayerDirectory>,
}

impl AuthService {
    pub fn new(directory: Arc<PlayerDirectory>) -> Self {
        AuthService { directory }
    }

    /// Creates a new player for `username`.
    ///
    /// Usernames are compared exactly, so `Alice` and `alice` are two accounts. Every stored
    /// player counts as active until it logs out or gets swept, no matter when it was last seen.
    pub async fn login(&self, username: &str) -> Result<Player, ServerError> {
        if username.trim().is_empty() {
            return Err(ServerError::InvalidRequest {
                reason: "username is required".into(),
            });
        }

        let player = Player::new(username);
        // The store rejects a taken username atomically, two racing logins cannot both win.
        self.directory.create(player.clone()).await?;
        tracing::info!(player_id = %player.id, username, "Player logged in.");
        Ok(player)
    }

    pub async fn validate_credential(&self, credential: &str) -> Result<Player, ServerError> {
        match self.directory.get_by_credential(credential).await {
            Ok(player) => Ok(player),
            Err(err) if err.is_not_found() => Err(ServerError::InvalidCredential),
            Err(err) => Err(err),
        }
    }

    /// Deletes the player record, which frees its username and credential.
    pub async fn logout(&self, player_id: &PlayerId) -> Result<Player, ServerError> {
        let player = self.directory.delete(player_id).await?;
        tracing::info!(%player_id, username = %player.username, "Player logged out.");
        Ok(player)
    }

    pub async fn touch_activity(&self, player_id: &PlayerId) -> Result<(), ServerError> {
        self.directory
            .modify(player_id, |player| player.last_activity_at = Utc::now())
            .await
            .map(|_| ())
    }

    /// Deletes every player that has been silent for longer than `threshold`.
    ///
    /// Each candidate is re-checked under its own lock right before deletion, so a player who
    /// became active during the sweep is kept. Returns the removed players.
    pub async fn sweep_inactive(&self, threshold: Duration) -> Result<Vec<Player>, ServerError> {
        let threshold = chrono::Duration::from_std(threshold).map_err(|err| {
            ServerError::InvalidRequest {
                reason: format!("inactivity threshold out of range: {err}"),
            }
        })?;

        let mut removed = Vec::new();
        for candidate in self.directory.list().await? {
            let is_stale = |player: &Player| Utc::now() - player.last_activity_at > threshold;
            if !is_stale(&candidate) {
                continue;
            }
            if let Some(player) = self.directory.delete_if(&candidate.id, is_stale).await? {
                tracing::info!(player_id = %player.id, username = %player.username, "Removed inactive player.");
                removed.push(player);
            }
        }
        Ok(removed)
    }
}
