use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use skyquiz_shared::RouteDetails;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::warn;

use crate::config::{
    BROWSER_USER_AGENT, DEFAULT_BROADCAST_BUFFER, Settings, upstream_connect_timeout,
    upstream_http_timeout,
};
use crate::quiz::orchestrator::RoundOrchestrator;
use crate::services::route_resolver::{FlightPageResolver, RouteLookup};
use crate::services::snapshot_cache::SnapshotCache;
use crate::services::tile_cache::TileCache;
use crate::store::{GameStore, JsonFileStore};

/// Pre-serialized snapshot event, serialized once by the poller and shared by all SSE clients.
#[derive(Debug, Clone)]
pub struct SnapshotEvent {
    pub seq: u64,
    pub json: Arc<Bytes>,
}

/// Most recent serialized snapshot, replayed to newly connected or lagging SSE clients.
#[derive(Debug, Clone, Default)]
pub struct LiveFeed {
    pub seq: u64,
    pub snapshot_json: Arc<Bytes>,
}

#[derive(Debug, Clone)]
pub struct CachedRoute {
    pub details: RouteDetails,
    pub cached_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub snapshots: Arc<SnapshotCache>,
    pub tiles: Arc<TileCache>,
    pub resolver: Arc<dyn RouteLookup>,
    /// Route details for user-selected aircraft, keyed by callsign.
    pub route_cache: Arc<DashMap<String, CachedRoute>>,
    /// Identity of the aircraft the renderer has selected; looked up in the latest snapshot on demand.
    pub selected: Arc<RwLock<Option<String>>>,
    pub store: Arc<dyn GameStore>,
    pub game: Arc<Mutex<RoundOrchestrator>>,
    pub live_feed: Arc<RwLock<LiveFeed>>,
    pub next_seq: Arc<AtomicU64>,
    pub event_tx: broadcast::Sender<SnapshotEvent>,
    pub observability: Arc<ObservabilityCounters>,
}

#[derive(Debug, Default)]
pub struct ObservabilityCounters {
    polls_ok_total: AtomicU64,
    polls_failed_total: AtomicU64,
    polls_rate_limited_total: AtomicU64,
    snapshot_cache_hits_total: AtomicU64,
    tile_fetches_started_total: AtomicU64,
    tile_fetches_failed_total: AtomicU64,
    resolver_successes_total: AtomicU64,
    resolver_failures_total: AtomicU64,
    discarded_targets_total: AtomicU64,
    route_cache_hits_total: AtomicU64,
    persist_failures_total: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct ObservabilitySnapshot {
    pub polls_ok_total: u64,
    pub polls_failed_total: u64,
    pub polls_rate_limited_total: u64,
    pub snapshot_cache_hits_total: u64,
    pub tile_fetches_started_total: u64,
    pub tile_fetches_failed_total: u64,
    pub resolver_successes_total: u64,
    pub resolver_failures_total: u64,
    pub discarded_targets_total: u64,
    pub route_cache_hits_total: u64,
    pub persist_failures_total: u64,
}

impl ObservabilityCounters {
    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            polls_ok_total: self.polls_ok_total.load(Ordering::Relaxed),
            polls_failed_total: self.polls_failed_total.load(Ordering::Relaxed),
            polls_rate_limited_total: self.polls_rate_limited_total.load(Ordering::Relaxed),
            snapshot_cache_hits_total: self.snapshot_cache_hits_total.load(Ordering::Relaxed),
            tile_fetches_started_total: self.tile_fetches_started_total.load(Ordering::Relaxed),
            tile_fetches_failed_total: self.tile_fetches_failed_total.load(Ordering::Relaxed),
            resolver_successes_total: self.resolver_successes_total.load(Ordering::Relaxed),
            resolver_failures_total: self.resolver_failures_total.load(Ordering::Relaxed),
            discarded_targets_total: self.discarded_targets_total.load(Ordering::Relaxed),
            route_cache_hits_total: self.route_cache_hits_total.load(Ordering::Relaxed),
            persist_failures_total: self.persist_failures_total.load(Ordering::Relaxed),
        }
    }

    pub fn record_poll_ok(&self) {
        self.polls_ok_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_failed(&self) {
        self.polls_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_rate_limited(&self) {
        self.polls_rate_limited_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_cache_hit(&self) {
        self.snapshot_cache_hits_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tile_fetch_started(&self) {
        self.tile_fetches_started_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tile_fetch_failed(&self) {
        self.tile_fetches_failed_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolver_success(&self) {
        self.resolver_successes_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolver_failure(&self) {
        self.resolver_failures_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded_target(&self) {
        self.discarded_targets_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_route_cache_hit(&self) {
        self.route_cache_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures_total.fetch_add(1, Ordering::Relaxed);
    }
}

/// Shared upstream client: every outbound call carries the configured request timeout.
pub fn build_http_client() -> reqwest::Client {
    let request_timeout = upstream_http_timeout();
    let connect_timeout = upstream_connect_timeout();
    reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .timeout(request_timeout)
        .connect_timeout(connect_timeout)
        .build()
        .or_else(|e| {
            warn!(
                error = %e,
                "failed to build configured HTTP client, retrying without custom user-agent"
            );
            reqwest::Client::builder()
                .timeout(request_timeout)
                .connect_timeout(connect_timeout)
                .build()
        })
        .unwrap_or_else(|e| {
            panic!("failed to build timeout-configured HTTP client: {e}");
        })
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let http_client = build_http_client();
        let resolver: Arc<dyn RouteLookup> = Arc::new(FlightPageResolver::new(
            http_client.clone(),
            settings.route_page_base_url.clone(),
        ));
        let store: Arc<dyn GameStore> = Arc::new(JsonFileStore::new(settings.data_dir.clone()));
        Self::with_parts(settings, http_client, resolver, store)
    }

    pub fn with_parts(
        settings: Settings,
        http_client: reqwest::Client,
        resolver: Arc<dyn RouteLookup>,
        store: Arc<dyn GameStore>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(DEFAULT_BROADCAST_BUFFER);
        let observability = Arc::new(ObservabilityCounters::default());

        let snapshots = Arc::new(SnapshotCache::new(
            http_client.clone(),
            settings.states_url.clone(),
            settings.token_url.clone(),
            settings.credentials.clone(),
            settings.snapshot_ttl,
            Arc::clone(&observability),
        ));
        let tiles = Arc::new(TileCache::new(
            http_client.clone(),
            settings.tile_url_template.clone(),
            Arc::clone(&observability),
        ));
        let game = RoundOrchestrator::new(
            Arc::clone(&snapshots),
            Arc::clone(&resolver),
            Arc::clone(&store),
            settings.home_base_names.clone(),
            Arc::clone(&observability),
        );

        Self {
            settings: Arc::new(settings),
            snapshots,
            tiles,
            resolver,
            route_cache: Arc::new(DashMap::new()),
            selected: Arc::new(RwLock::new(None)),
            store,
            game: Arc::new(Mutex::new(game)),
            live_feed: Arc::new(RwLock::new(LiveFeed::default())),
            next_seq: Arc::new(AtomicU64::new(0)),
            event_tx,
            observability,
        }
    }
}
