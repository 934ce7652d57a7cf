use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use skyquiz_shared::{AircraftRecord, RouteDetails};

use crate::config::Settings;
use crate::errors::ResolveError;
use crate::services::route_resolver::RouteLookup;
use crate::state::AppState;
use crate::store::{GameStore, JsonFileStore};

pub(crate) async fn spawn_test_server(app: Router) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve test app");
    });
    (addr, handle)
}

/// Settings pointing every upstream at a closed local port.
pub(crate) fn test_settings(data_dir: &Path) -> Settings {
    Settings {
        home_lat: 60.3,
        home_lon: 24.9,
        home_base_names: vec!["Helsinki".to_string(), "Vantaa".to_string()],
        query_radius_deg: 1.0,
        poll_interval: Duration::from_secs(5),
        snapshot_ttl: Duration::from_secs(10),
        states_url: "http://127.0.0.1:9/states".to_string(),
        token_url: "http://127.0.0.1:9/token".to_string(),
        tile_url_template: "http://127.0.0.1:9/{z}/{x}/{y}.png".to_string(),
        route_page_base_url: "http://127.0.0.1:9/live/flight".to_string(),
        data_dir: data_dir.to_path_buf(),
        credentials: None,
    }
}

pub(crate) fn test_state(resolver: Arc<dyn RouteLookup>) -> (AppState, tempfile::TempDir) {
    test_state_with(resolver, |_| {})
}

pub(crate) fn test_state_with(
    resolver: Arc<dyn RouteLookup>,
    configure: impl FnOnce(&mut Settings),
) -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut settings = test_settings(dir.path());
    configure(&mut settings);
    let store: Arc<dyn GameStore> = Arc::new(JsonFileStore::new(settings.data_dir.clone()));
    let state = AppState::with_parts(settings, reqwest::Client::new(), resolver, store);
    (state, dir)
}

pub(crate) fn aircraft(icao24: &str, callsign: &str) -> AircraftRecord {
    AircraftRecord {
        icao24: icao24.to_string(),
        callsign: callsign.to_string(),
        lat: 60.3,
        lon: 24.9,
        velocity_kts: 420,
        heading: 90.0,
        altitude_ft: 35_000,
        on_ground: false,
        origin_country: "Finland".to_string(),
        category: "Large".to_string(),
    }
}

pub(crate) fn route(origin: &str, destination: &str) -> RouteDetails {
    RouteDetails {
        destination: destination.to_string(),
        real_destination: destination.to_string(),
        model: "Airbus A320".to_string(),
        origin: origin.to_string(),
    }
}

/// Resolver stub answering from a script, then from a fixed fallback.
pub(crate) struct ScriptedRoute {
    script: Mutex<VecDeque<Result<RouteDetails, ResolveError>>>,
    fallback: Option<RouteDetails>,
    calls: AtomicUsize,
}

impl ScriptedRoute {
    pub(crate) fn then(
        script: Vec<Result<RouteDetails, ResolveError>>,
        fallback: Option<RouteDetails>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn always(origin: &str, destination: &str) -> Arc<Self> {
        Self::then(Vec::new(), Some(route(origin, destination)))
    }

    /// Every lookup fails as if the page had no embedded data.
    pub(crate) fn failing() -> Arc<Self> {
        Self::then(Vec::new(), None)
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteLookup for ScriptedRoute {
    async fn resolve_route(&self, _callsign: &str) -> Result<RouteDetails, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .script
            .lock()
            .expect("script lock")
            .pop_front();
        match scripted {
            Some(result) => result,
            None => self.fallback.clone().ok_or(ResolveError::MarkerNotFound),
        }
    }
}
