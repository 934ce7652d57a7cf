use serde::{Deserialize, Serialize};

use crate::aircraft::AircraftRecord;
use crate::route::RouteDetails;

pub const ROUNDS_PER_GAME: u32 = 5;
pub const BASE_CORRECT_SCORE: u32 = 100;
pub const MAX_TIME_BONUS: f64 = 100.0;
pub const TIME_BONUS_HORIZON_SECS: f64 = 20.0;
/// Rough best-case points per game, used for the performance percentage.
pub const NOMINAL_GAME_SCORE: u64 = 1000;

/// Points for a correct answer given `elapsed_secs` since the question appeared.
pub fn score_for_correct_guess(elapsed_secs: f64) -> u32 {
    let remaining = (TIME_BONUS_HORIZON_SECS - elapsed_secs) / TIME_BONUS_HORIZON_SECS;
    let bonus = (remaining * MAX_TIME_BONUS).round().max(0.0);
    BASE_CORRECT_SCORE + bonus as u32
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub name: String,
    #[serde(default)]
    pub games_played: u32,
    #[serde(default)]
    pub total_score: u64,
    #[serde(default)]
    pub best_score: u32,
}

impl UserStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Fold one finished game into the cumulative stats.
    pub fn record_game(&mut self, score: u32) {
        self.games_played += 1;
        self.total_score += u64::from(score);
        self.best_score = self.best_score.max(score);
    }

    pub fn performance_percent(&self) -> u32 {
        if self.games_played == 0 {
            return 0;
        }
        let max_total = u64::from(self.games_played) * NOMINAL_GAME_SCORE;
        (self.total_score * 100 / max_total).min(100) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub name: String,
    pub score: u32,
    /// Calendar date of the game (`YYYY-MM-DD`).
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardUser {
    #[serde(flatten)]
    pub stats: UserStats,
    pub performance_percent: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub high_scores: Vec<ScoreEntry>,
    pub user_stats: Vec<LeaderboardUser>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Idle,
    TargetSelecting,
    AwaitingDetails,
    Playing,
    Result,
    GameOver,
    /// Every target attempt for the round produced unusable route data.
    NoValidTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// The aircraft is heading to the home base; ask where it came from.
    Origin,
    Destination,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuessOutcome {
    pub correct: bool,
    pub points: u32,
    pub correct_answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrong_choice: Option<String>,
}

/// What the renderer needs to draw the quiz panel for the active round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundView {
    pub index: u32,
    pub question: String,
    pub kind: QuestionKind,
    pub options: Vec<String>,
    /// Latest record of the target, `None` once it has left the area.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<AircraftRecord>,
    pub details: RouteDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<GuessOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameView {
    pub phase: GamePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserStats>,
    pub round: u32,
    pub score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<RoundView>,
}
