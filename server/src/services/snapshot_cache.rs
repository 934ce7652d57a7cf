use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use skyquiz_shared::{AircraftRecord, Snapshot};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::Credentials;
use crate::errors::{SnapshotError, TokenError};
use crate::state::ObservabilityCounters;

/// Bounding box of a state-vector query, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lamin: f64,
    pub lomin: f64,
    pub lamax: f64,
    pub lomax: f64,
}

impl BoundingBox {
    pub fn around(center_lat: f64, center_lon: f64, radius_deg: f64) -> Self {
        Self {
            lamin: center_lat - radius_deg,
            lomin: center_lon - radius_deg,
            lamax: center_lat + radius_deg,
            lomax: center_lon + radius_deg,
        }
    }
}

/// Failed refresh: the last successful snapshot, however old, plus why the refresh failed.
#[derive(Debug)]
pub struct StaleSnapshot {
    pub last_known: Arc<Snapshot>,
    pub error: SnapshotError,
}

#[derive(Debug, Default)]
struct RefreshSlot {
    fetched_at: Option<Instant>,
    access_token: Option<String>,
}

/// Read-through cache over the remote state-vector API with a single TTL slot.
///
/// Refreshes are serialized by `slot`; readers only ever see a whole `Arc<Snapshot>`.
pub struct SnapshotCache {
    client: reqwest::Client,
    states_url: String,
    token_url: String,
    credentials: Option<Credentials>,
    ttl: Duration,
    slot: Mutex<RefreshSlot>,
    current: RwLock<Arc<Snapshot>>,
    observability: Arc<ObservabilityCounters>,
}

impl SnapshotCache {
    pub fn new(
        client: reqwest::Client,
        states_url: String,
        token_url: String,
        credentials: Option<Credentials>,
        ttl: Duration,
        observability: Arc<ObservabilityCounters>,
    ) -> Self {
        Self {
            client,
            states_url,
            token_url,
            credentials,
            ttl,
            slot: Mutex::new(RefreshSlot::default()),
            current: RwLock::new(Arc::new(Snapshot::empty())),
            observability,
        }
    }

    /// Last successful snapshot. Never touches the network.
    pub async fn latest(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.current.read().await)
    }

    /// Latest record for an aircraft identity, `None` if it has disappeared.
    pub async fn find(&self, icao24: &str) -> Option<AircraftRecord> {
        self.current.read().await.find(icao24).cloned()
    }

    pub async fn fetch_snapshot(
        &self,
        center_lat: f64,
        center_lon: f64,
        radius_deg: f64,
    ) -> Result<Arc<Snapshot>, StaleSnapshot> {
        let mut slot = self.slot.lock().await;

        if let Some(fetched_at) = slot.fetched_at
            && fetched_at.elapsed() < self.ttl
        {
            self.observability.record_snapshot_cache_hit();
            return Ok(self.latest().await);
        }

        if slot.access_token.is_none()
            && let Some(credentials) = self.credentials.as_ref()
        {
            match self.exchange_token(credentials).await {
                Ok(token) => {
                    info!("obtained state-vector API access token");
                    slot.access_token = Some(token);
                }
                Err(e) => {
                    warn!(error = %e, "token exchange failed; falling back to anonymous request");
                }
            }
        }

        let bbox = BoundingBox::around(center_lat, center_lon, radius_deg);
        match self
            .request_states(&bbox, slot.access_token.as_deref())
            .await
        {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self.current.write().await = Arc::clone(&snapshot);
                slot.fetched_at = Some(Instant::now());
                debug!(aircraft = snapshot.len(), "snapshot refreshed");
                Ok(snapshot)
            }
            Err(error) => {
                if matches!(error, SnapshotError::Status(401)) {
                    // Expired or revoked; exchange again on the next refresh.
                    slot.access_token = None;
                }
                Err(StaleSnapshot {
                    last_known: self.latest().await,
                    error,
                })
            }
        }
    }

    async fn request_states(
        &self,
        bbox: &BoundingBox,
        access_token: Option<&str>,
    ) -> Result<Snapshot, SnapshotError> {
        let mut request = self.client.get(&self.states_url).query(&[
            ("lamin", bbox.lamin),
            ("lomin", bbox.lomin),
            ("lamax", bbox.lamax),
            ("lomax", bbox.lomax),
        ]);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SnapshotError::RateLimited);
        }
        if status != StatusCode::OK {
            return Err(SnapshotError::Status(status.as_u16()));
        }

        let bytes = resp.bytes().await?;
        Ok(parse_states_payload(bytes.as_ref())?)
    }

    async fn exchange_token(&self, credentials: &Credentials) -> Result<String, TokenError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            #[serde(default)]
            access_token: Option<String>,
        }

        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(TokenError::Status(status.as_u16()));
        }

        let body: TokenResponse = resp.json().await?;
        body.access_token
            .filter(|token| !token.is_empty())
            .ok_or(TokenError::MissingToken)
    }

    #[cfg(test)]
    pub(crate) async fn seed(&self, snapshot: Snapshot) {
        *self.current.write().await = Arc::new(snapshot);
    }
}

#[derive(Deserialize)]
struct StatesPayload {
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    states: Option<Vec<Vec<Value>>>,
}

fn parse_states_payload(bytes: &[u8]) -> Result<Snapshot, serde_json::Error> {
    let payload: StatesPayload = serde_json::from_slice(bytes)?;
    let aircraft = payload
        .states
        .unwrap_or_default()
        .iter()
        .filter_map(|state| AircraftRecord::from_state_vector(state))
        .collect();
    Ok(Snapshot::new(aircraft, payload.time))
}
