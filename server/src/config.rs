use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

pub const OPENSKY_STATES_URL: &str = "https://opensky-network.org/api/states/all";
pub const OPENSKY_TOKEN_URL: &str =
    "https://auth.opensky-network.org/auth/realms/opensky-network/protocol/openid-connect/token";
pub const TILE_URL_TEMPLATE: &str = "https://basemaps.cartocdn.com/dark_all/{z}/{x}/{y}.png";
pub const ROUTE_PAGE_BASE_URL: &str = "https://www.flightaware.com/live/flight";

pub const DEFAULT_HOME_LAT: f64 = 60.25881233034921;
pub const DEFAULT_HOME_LON: f64 = 24.780103286993022;
pub const DEFAULT_HOME_BASE_NAMES: &[&str] = &["Helsinki", "Vantaa"];
pub const DEFAULT_QUERY_RADIUS_DEG: f64 = 1.0;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_SNAPSHOT_TTL_SECS: u64 = 10;
pub const DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_SERVER_PORT: u16 = 4000;
pub const DEFAULT_STATIC_DIR: &str = "web/dist";
pub const DEFAULT_CREDENTIALS_PATH: &str = "./credentials.json";
pub const DATA_DIR_NAME: &str = ".flight-monitor-data";

// Quiz timing
pub const EMPTY_SNAPSHOT_RETRY: Duration = Duration::from_secs(1);
pub const RESULT_DISPLAY: Duration = Duration::from_secs(2);
pub const MAX_TARGET_ATTEMPTS: u32 = 25;
pub const FRAME_INTERVAL: Duration = Duration::from_millis(50);

pub const TILE_COMPLETION_QUEUE: usize = 64;
pub const HIGH_SCORE_LIMIT: usize = 10;
pub const FALLBACK_CITIES: &[&str] = &["London", "Paris", "Berlin", "Helsinki"];
pub const SEED_AIRPORTS: &[&str] = &[
    "London", "Paris", "Berlin", "Helsinki", "Tokyo", "New York", "Dubai", "Rome",
];

pub const ROUTE_CACHE_TTL_SECS: i64 = 300; // 5 minutes
pub const ROUTE_CACHE_EVICTION_SECS: u64 = 60;
pub const SSE_KEEPALIVE_SECS: u64 = 15;
pub const DEFAULT_BROADCAST_BUFFER: usize = 16;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

fn env_value(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_secs(name: &str, default: u64) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default))
}

pub fn home_lat() -> f64 {
    env_value(&["HOME_LAT", "MY_LAT"])
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|lat| lat.is_finite() && lat.abs() < 90.0)
        .unwrap_or(DEFAULT_HOME_LAT)
}

pub fn home_lon() -> f64 {
    env_value(&["HOME_LON", "MY_LON"])
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|lon| lon.is_finite() && lon.abs() <= 180.0)
        .unwrap_or(DEFAULT_HOME_LON)
}

/// Labels that mark a destination as the home airport.
pub fn home_base_names() -> Vec<String> {
    let configured = env_value(&["HOME_BASE_NAMES"])
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if configured.is_empty() {
        DEFAULT_HOME_BASE_NAMES
            .iter()
            .map(|name| name.to_string())
            .collect()
    } else {
        configured
    }
}

pub fn query_radius_deg() -> f64 {
    env_value(&["QUERY_RADIUS_DEG"])
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|radius| radius.is_finite() && *radius > 0.0)
        .unwrap_or(DEFAULT_QUERY_RADIUS_DEG)
}

pub fn poll_interval() -> Duration {
    env_secs("POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)
}

pub fn snapshot_ttl() -> Duration {
    env_secs("SNAPSHOT_TTL_SECS", DEFAULT_SNAPSHOT_TTL_SECS)
}

pub fn upstream_http_timeout() -> Duration {
    env_secs(
        "UPSTREAM_HTTP_TIMEOUT_SECS",
        DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECS,
    )
}

pub fn upstream_connect_timeout() -> Duration {
    env_secs(
        "UPSTREAM_CONNECT_TIMEOUT_SECS",
        DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS,
    )
}

pub fn opensky_states_url() -> String {
    env_value(&["OPENSKY_STATES_URL"]).unwrap_or_else(|| OPENSKY_STATES_URL.to_string())
}

pub fn opensky_token_url() -> String {
    env_value(&["OPENSKY_TOKEN_URL"]).unwrap_or_else(|| OPENSKY_TOKEN_URL.to_string())
}

pub fn tile_url_template() -> String {
    env_value(&["TILE_URL_TEMPLATE"]).unwrap_or_else(|| TILE_URL_TEMPLATE.to_string())
}

pub fn route_page_base_url() -> String {
    env_value(&["ROUTE_PAGE_BASE_URL"])
        .map(|url| url.trim_end_matches('/').to_string())
        .unwrap_or_else(|| ROUTE_PAGE_BASE_URL.to_string())
}

pub fn server_port() -> u16 {
    env_value(&["PORT"])
        .and_then(|value| value.parse::<u16>().ok())
        .filter(|port| *port > 0)
        .unwrap_or(DEFAULT_SERVER_PORT)
}

pub fn static_dir() -> PathBuf {
    env_value(&["STATIC_DIR"])
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR))
}

/// Directory holding users, scores and airports. Falls back to the working directory.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = env_value(&["SKYQUIZ_DATA_DIR"]) {
        return PathBuf::from(dir);
    }
    match env_value(&["HOME", "USERPROFILE"]) {
        Some(home) => PathBuf::from(home).join(DATA_DIR_NAME),
        None => PathBuf::from("."),
    }
}

pub fn credentials_path() -> PathBuf {
    env_value(&["CREDENTIALS_PATH"])
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_PATH))
}

/// OAuth client credentials for the state-vector API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
}

impl Credentials {
    fn is_complete(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

/// Environment first, then the credentials file; `None` means anonymous access.
pub fn load_credentials() -> Option<Credentials> {
    if let (Some(client_id), Some(client_secret)) =
        (env_value(&["CLIENT_ID"]), env_value(&["CLIENT_SECRET"]))
    {
        info!("using API credentials from environment");
        return Some(Credentials {
            client_id,
            client_secret,
        });
    }

    let path = credentials_path();
    let raw = match std::fs::read(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("no API credentials configured; polling anonymously");
            return None;
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to read credentials file");
            return None;
        }
    };

    match serde_json::from_slice::<Credentials>(&raw) {
        Ok(credentials) if credentials.is_complete() => {
            info!(path = %path.display(), "using API credentials from file");
            Some(credentials)
        }
        Ok(_) => {
            warn!(path = %path.display(), "credentials file is missing a client id or secret");
            None
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to parse credentials file");
            None
        }
    }
}

/// Startup settings, read once.
#[derive(Debug, Clone)]
pub struct Settings {
    pub home_lat: f64,
    pub home_lon: f64,
    pub home_base_names: Vec<String>,
    pub query_radius_deg: f64,
    pub poll_interval: Duration,
    pub snapshot_ttl: Duration,
    pub states_url: String,
    pub token_url: String,
    pub tile_url_template: String,
    pub route_page_base_url: String,
    pub data_dir: PathBuf,
    pub credentials: Option<Credentials>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            home_lat: home_lat(),
            home_lon: home_lon(),
            home_base_names: home_base_names(),
            query_radius_deg: query_radius_deg(),
            poll_interval: poll_interval(),
            snapshot_ttl: snapshot_ttl(),
            states_url: opensky_states_url(),
            token_url: opensky_token_url(),
            tile_url_template: tile_url_template(),
            route_page_base_url: route_page_base_url(),
            data_dir: data_dir(),
            credentials: load_credentials(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::time::Duration;

    use super::*;

    #[test]
    fn defaults_apply_when_environment_is_unset() {
        temp_env::with_vars_unset(
            [
                "HOME_LAT",
                "MY_LAT",
                "HOME_BASE_NAMES",
                "POLL_INTERVAL_SECS",
                "SNAPSHOT_TTL_SECS",
            ],
            || {
                assert_eq!(home_lat(), DEFAULT_HOME_LAT);
                assert_eq!(
                    home_base_names(),
                    vec!["Helsinki".to_string(), "Vantaa".to_string()]
                );
                assert_eq!(poll_interval(), Duration::from_secs(5));
                assert_eq!(snapshot_ttl(), Duration::from_secs(10));
            },
        );
    }

    #[test]
    fn legacy_location_variables_are_honoured() {
        temp_env::with_vars(
            [
                ("HOME_LAT", None),
                ("MY_LAT", Some("51.47")),
                ("HOME_LON", None),
                ("MY_LON", Some("-0.4543")),
            ],
            || {
                assert_eq!(home_lat(), 51.47);
                assert_eq!(home_lon(), -0.4543);
            },
        );
    }

    #[test]
    fn invalid_overrides_fall_back_to_defaults() {
        temp_env::with_vars(
            [
                ("HOME_LAT", Some("95")),
                ("QUERY_RADIUS_DEG", Some("-2")),
                ("POLL_INTERVAL_SECS", Some("0")),
                ("PORT", Some("not-a-port")),
            ],
            || {
                assert_eq!(home_lat(), DEFAULT_HOME_LAT);
                assert_eq!(query_radius_deg(), DEFAULT_QUERY_RADIUS_DEG);
                assert_eq!(poll_interval(), Duration::from_secs(5));
                assert_eq!(server_port(), DEFAULT_SERVER_PORT);
            },
        );
    }

    #[test]
    fn home_base_names_parse_comma_list() {
        temp_env::with_var("HOME_BASE_NAMES", Some(" Stockholm , Arlanda,, "), || {
            assert_eq!(
                home_base_names(),
                vec!["Stockholm".to_string(), "Arlanda".to_string()]
            );
        });
    }

    #[test]
    fn credentials_prefer_environment_over_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("credentials.json");
        let mut file = std::fs::File::create(&path).expect("create credentials file");
        file.write_all(br#"{"clientId":"file-id","clientSecret":"file-secret"}"#)
            .expect("write credentials file");
        let path_str = path.to_string_lossy().to_string();

        temp_env::with_vars(
            [
                ("CLIENT_ID", Some("env-id")),
                ("CLIENT_SECRET", Some("env-secret")),
                ("CREDENTIALS_PATH", Some(path_str.as_str())),
            ],
            || {
                let credentials = load_credentials().expect("credentials from env");
                assert_eq!(credentials.client_id, "env-id");
            },
        );

        temp_env::with_vars(
            [
                ("CLIENT_ID", None),
                ("CLIENT_SECRET", None),
                ("CREDENTIALS_PATH", Some(path_str.as_str())),
            ],
            || {
                let credentials = load_credentials().expect("credentials from file");
                assert_eq!(credentials.client_id, "file-id");
                assert_eq!(credentials.client_secret, "file-secret");
            },
        );
    }

    #[test]
    fn missing_credentials_file_means_anonymous() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("absent.json");
        let path_str = path.to_string_lossy().to_string();
        temp_env::with_vars(
            [
                ("CLIENT_ID", None),
                ("CLIENT_SECRET", None),
                ("CREDENTIALS_PATH", Some(path_str.as_str())),
            ],
            || {
                assert!(load_credentials().is_none());
            },
        );
    }
}
