//! The player directory: the one place that reads and writes player records.
//!
//! Every mutation runs as get -> modify -> update under the player's stripe, so an activity
//! touch cannot overwrite a session assignment that landed a moment earlier.

use protocol::LeaderboardEntry;
use std::sync::Arc;

use crate::error::ServerError;
use crate::locks::StripedLocks;
use crate::model::{Player, PlayerId};
use crate::storage::PlayerStore;

pub struct PlayerDirectory {
    store: Arc<dyn PlayerStore>,
    locks: StripedLocks,
}

impl PlayerDirectory {
    pub fn new(store: Arc<dyn PlayerStore>) -> Self {
        PlayerDirectory {
            store,
            locks: StripedLocks::default(),
        }
    }

    pub async fn create(&self, player: Player) -> Result<(), ServerError> {
        self.store.create(player).await
    }

    pub async fn get(&self, id: &PlayerId) -> Result<Player, ServerError> {
        self.store.get(id).await
    }

    pub async fn get_by_credential(&self, credential: &str) -> Result<Player, ServerError> {
        self.store.get_by_credential(credential).await
    }

    pub async fn list(&self) -> Result<Vec<Player>, ServerError> {
        self.store.list().await
    }

    pub async fn delete(&self, id: &PlayerId) -> Result<Player, ServerError> {
        let _guard = self.locks.lock(id.as_str()).await;
        self.store.delete(id).await
    }

    /// Applies `change` to the stored player and persists it. Returns the updated record.
    pub async fn modify<F>(&self, id: &PlayerId, change: F) -> Result<Player, ServerError>
    where
        F: FnOnce(&mut Player),
    {
        let _guard = self.locks.lock(id.as_str()).await;
        let mut player = self.store.get(id).await?;
        change(&mut player);
        self.store.update(player.clone()).await?;
        Ok(player)
    }

    /// Deletes the player only if `still_wanted` holds for the freshest record.
    /// Returns the deleted record, `None` if the player was kept or is already gone.
    pub async fn delete_if<F>(&self, id: &PlayerId, still_wanted: F) -> Result<Option<Player>, ServerError>
    where
        F: FnOnce(&Player) -> bool,
    {
        let _guard = self.locks.lock(id.as_str()).await;
        let player = match self.store.get(id).await {
            Ok(player) => player,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        if !still_wanted(&player) {
            return Ok(None);
        }
        self.store.delete(id).await.map(Some)
    }

    /// The best `limit` players by high score, among those who finished at least one game.
    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, ServerError> {
        let mut players: Vec<Player> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|player| player.stats.total_games > 0)
            .collect();
        // Username as tie breaker keeps the order stable between calls.
        players.sort_by(|a, b| {
            b.stats
                .high_score
                .cmp(&a.stats.high_score)
                .then_with(|| a.username.cmp(&b.username))
        });

        Ok(players
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(index, player)| LeaderboardEntry {
                rank: index + 1,
                username: player.username,
                high_score: player.stats.high_score,
                total_games: player.stats.total_games,
                wins: player.stats.wins,
                losses: player.stats.losses,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryPlayerStore;

    fn directory() -> PlayerDirectory {
        PlayerDirectory::new(Arc::new(MemoryPlayerStore::new()))
    }

    #[tokio::test]
    async fn modify_persists_the_change() {
        let directory = directory();
        let player = Player::new("alice");
        directory.create(player.clone()).await.unwrap();

        let updated = directory
            .modify(&player.id, |p| p.in_queue = true)
            .await
            .unwrap();
        assert!(updated.in_queue);
        assert!(directory.get(&player.id).await.unwrap().in_queue);

        let missing = directory.modify(&PlayerId::from("ghost"), |_| {}).await;
        assert!(missing.unwrap_err().is_not_found());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_modifications_are_not_lost() {
        let directory = Arc::new(directory());
        let player = Player::new("alice");
        directory.create(player.clone()).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let directory = directory.clone();
            let id = player.id.clone();
            tasks.push(tokio::spawn(async move {
                directory
                    .modify(&id, |p| p.stats.record(true, 10))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(directory.get(&player.id).await.unwrap().stats.wins, 50);
    }

    #[tokio::test]
    async fn delete_if_rechecks_the_fresh_record() {
        let directory = directory();
        let player = Player::new("alice");
        directory.create(player.clone()).await.unwrap();

        assert_eq!(directory.delete_if(&player.id, |_| false).await.unwrap(), None);
        let removed = directory.delete_if(&player.id, |_| true).await.unwrap();
        assert_eq!(removed.map(|p| p.id), Some(player.id.clone()));
        assert_eq!(directory.delete_if(&player.id, |_| true).await.unwrap(), None);
    }

    #[tokio::test]
    async fn leaderboard_ranks_players_with_games_by_high_score() {
        let directory = directory();
        for (name, games, high) in [("ann", 2, 500), ("ben", 0, 0), ("cid", 1, 900), ("dee", 3, 700)] {
            let mut player = Player::new(name);
            player.stats.total_games = games;
            player.stats.high_score = high;
            directory.create(player).await.unwrap();
        }

        let board = directory.leaderboard(2).await.unwrap();
        let names: Vec<_> = board.iter().map(|e| e.username.as_str()).collect();
        assert_eq!(names, ["cid", "dee"]);
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[1].rank, 2);
        assert_eq!(directory.leaderboard(10).await.unwrap().len(), 3);
    }
}
