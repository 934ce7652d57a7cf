use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use skyquiz_shared::{Leaderboard, LeaderboardUser, ScoreEntry, UserStats, is_known_label};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{HIGH_SCORE_LIMIT, SEED_AIRPORTS};
use crate::errors::StoreError;

const USERS_FILE: &str = "users.json";
const SCORES_FILE: &str = "scores.json";
const AIRPORTS_FILE: &str = "airports.json";

/// Flat persistence of players, high scores and airport labels seen so far.
#[async_trait]
pub trait GameStore: Send + Sync {
    async fn load_users(&self) -> Result<Vec<UserStats>, StoreError>;

    /// Fold one finished game into the player's stats, creating the player if needed.
    async fn save_user(&self, name: &str, score: u32) -> Result<UserStats, StoreError>;

    /// Returns whether the player existed.
    async fn delete_user(&self, name: &str) -> Result<bool, StoreError>;

    async fn load_scores(&self) -> Result<Vec<ScoreEntry>, StoreError>;

    /// Append, sort descending and keep the top entries.
    async fn add_score(&self, entry: ScoreEntry) -> Result<Vec<ScoreEntry>, StoreError>;

    async fn load_airports(&self) -> Result<Vec<String>, StoreError>;

    /// Remember an airport label. Blank and placeholder labels are ignored.
    async fn save_airport(&self, label: &str) -> Result<(), StoreError>;

    async fn find_user(&self, name: &str) -> Result<Option<UserStats>, StoreError> {
        Ok(self
            .load_users()
            .await?
            .into_iter()
            .find(|user| user.name == name))
    }

    async fn leaderboard(&self) -> Result<Leaderboard, StoreError> {
        let high_scores = self.load_scores().await?;
        let mut users = self.load_users().await?;
        users.sort_by(|a, b| b.best_score.cmp(&a.best_score).then_with(|| a.name.cmp(&b.name)));

        let user_stats = users
            .into_iter()
            .map(|stats| LeaderboardUser {
                performance_percent: stats.performance_percent(),
                stats,
            })
            .collect();

        Ok(Leaderboard {
            high_scores,
            user_stats,
        })
    }
}

/// JSON files in one data directory, every access serialized through one lock.
pub struct JsonFileStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            lock: Mutex::new(()),
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    async fn read_users(&self) -> Result<BTreeMap<String, UserStats>, StoreError> {
        Ok(read_json(&self.path(USERS_FILE)).await?.unwrap_or_default())
    }

    async fn read_scores(&self) -> Result<Vec<ScoreEntry>, StoreError> {
        Ok(read_json(&self.path(SCORES_FILE)).await?.unwrap_or_default())
    }

    async fn read_airports(&self) -> Result<Vec<String>, StoreError> {
        Ok(read_json(&self.path(AIRPORTS_FILE))
            .await?
            .unwrap_or_else(|| SEED_AIRPORTS.iter().map(|name| name.to_string()).collect()))
    }

    async fn write<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(self.path(file), bytes).await?;
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl GameStore for JsonFileStore {
    async fn load_users(&self) -> Result<Vec<UserStats>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_users().await?.into_values().collect())
    }

    async fn save_user(&self, name: &str, score: u32) -> Result<UserStats, StoreError> {
        let _guard = self.lock.lock().await;
        let mut users = self.read_users().await?;
        let user = users
            .entry(name.to_string())
            .or_insert_with(|| UserStats::new(name));
        user.record_game(score);
        let updated = user.clone();
        self.write(USERS_FILE, &users).await?;
        debug!(name, score, games = updated.games_played, "saved player stats");
        Ok(updated)
    }

    async fn delete_user(&self, name: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let mut users = self.read_users().await?;
        if users.remove(name).is_none() {
            return Ok(false);
        }
        self.write(USERS_FILE, &users).await?;
        Ok(true)
    }

    async fn load_scores(&self) -> Result<Vec<ScoreEntry>, StoreError> {
        let _guard = self.lock.lock().await;
        self.read_scores().await
    }

    async fn add_score(&self, entry: ScoreEntry) -> Result<Vec<ScoreEntry>, StoreError> {
        let _guard = self.lock.lock().await;
        let mut scores = self.read_scores().await?;
        scores.push(entry);
        scores.sort_by(|a, b| b.score.cmp(&a.score));
        scores.truncate(HIGH_SCORE_LIMIT);
        self.write(SCORES_FILE, &scores).await?;
        Ok(scores)
    }

    async fn load_airports(&self) -> Result<Vec<String>, StoreError> {
        let _guard = self.lock.lock().await;
        self.read_airports().await
    }

    async fn save_airport(&self, label: &str) -> Result<(), StoreError> {
        let label = label.trim();
        if !is_known_label(label) {
            return Ok(());
        }

        let _guard = self.lock.lock().await;
        let mut airports = self.read_airports().await?;
        if airports.iter().any(|known| known == label) {
            return Ok(());
        }
        airports.push(label.to_string());
        airports.sort();
        self.write(AIRPORTS_FILE, &airports).await
    }
}
