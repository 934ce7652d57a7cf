use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("rate limit exceeded (429)")]
    RateLimited,

    #[error("state-vector request failed with status {0}")]
    Status(u16),

    #[error("state-vector request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to decode state-vector payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl SnapshotError {
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("token exchange failed with status {0}")]
    Status(u16),

    #[error("token response missing access token")]
    MissingToken,
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("flight page request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("flight page returned status {0}")]
    Status(u16),

    #[error("no embedded flight data found in page")]
    MarkerNotFound,

    #[error("embedded flight data is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("embedded flight data has no flights structure")]
    MissingFlights,

    #[error("no activity log entry found in flight data")]
    NoActivityLog,
}

impl ResolveError {
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::Request(_) | Self::Status(_))
    }
}

#[derive(Error, Debug)]
pub enum TileError {
    #[error("tile request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("tile server returned status {0}")]
    Status(u16),

    #[error("failed to decode tile image: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GameError {
    #[error("no user is logged in")]
    NotLoggedIn,

    #[error("a game is already in progress")]
    AlreadyRunning,

    #[error("user name must not be empty")]
    EmptyName,
}
