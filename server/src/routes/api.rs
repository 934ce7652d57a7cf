use std::fmt::Write as _;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use skyquiz_shared::aircraft::MISSING_CALLSIGN;
use skyquiz_shared::{AircraftRecord, RouteDetails, TileKey};
use tracing::warn;

use crate::services::route_resolver::resolve_selected;
use crate::services::tile_cache::TileLookup;
use crate::state::{AppState, ObservabilitySnapshot};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
const TILE_CACHE_CONTROL: &str = "public, max-age=604800, immutable";

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let aircraft = state.snapshots.latest().await.len();
    let observability = state.observability.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "aircraft": aircraft,
        "tiles_cached": state.tiles.cached_count(),
        "route_cache_size": state.route_cache.len(),
        "observability": {
            "polls_ok_total": observability.polls_ok_total,
            "polls_failed_total": observability.polls_failed_total,
            "polls_rate_limited_total": observability.polls_rate_limited_total,
            "snapshot_cache_hits_total": observability.snapshot_cache_hits_total,
            "tile_fetches_started_total": observability.tile_fetches_started_total,
            "tile_fetches_failed_total": observability.tile_fetches_failed_total,
            "resolver_successes_total": observability.resolver_successes_total,
            "resolver_failures_total": observability.resolver_failures_total,
            "discarded_targets_total": observability.discarded_targets_total,
            "route_cache_hits_total": observability.route_cache_hits_total,
            "persist_failures_total": observability.persist_failures_total,
        }
    }))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let aircraft = state.snapshots.latest().await.len();
    let tiles_cached = state.tiles.cached_count();
    let observability = state.observability.snapshot();

    let body = render_prometheus_metrics(aircraft, tiles_cached, observability);

    (
        [
            (header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body,
    )
}

fn render_prometheus_metrics(
    aircraft: usize,
    tiles_cached: usize,
    observability: ObservabilitySnapshot,
) -> String {
    let mut body = String::new();
    write_metric(
        &mut body,
        "skyquiz_aircraft",
        "gauge",
        "Aircraft in the latest snapshot.",
        aircraft as u64,
    );
    write_metric(
        &mut body,
        "skyquiz_tiles_cached",
        "gauge",
        "Decoded basemap tiles held in memory.",
        tiles_cached as u64,
    );

    let counters = [
        (
            "skyquiz_polls_ok_total",
            "Snapshot polls that returned data (fresh or cached).",
            observability.polls_ok_total,
        ),
        (
            "skyquiz_polls_failed_total",
            "Snapshot polls that failed for reasons other than rate limiting.",
            observability.polls_failed_total,
        ),
        (
            "skyquiz_polls_rate_limited_total",
            "Snapshot polls rejected with HTTP 429.",
            observability.polls_rate_limited_total,
        ),
        (
            "skyquiz_snapshot_cache_hits_total",
            "Snapshot requests served from the freshness window.",
            observability.snapshot_cache_hits_total,
        ),
        (
            "skyquiz_tile_fetches_started_total",
            "Tile fetches launched.",
            observability.tile_fetches_started_total,
        ),
        (
            "skyquiz_tile_fetches_failed_total",
            "Tile fetches that failed to download or decode.",
            observability.tile_fetches_failed_total,
        ),
        (
            "skyquiz_resolver_successes_total",
            "Route lookups that returned details.",
            observability.resolver_successes_total,
        ),
        (
            "skyquiz_resolver_failures_total",
            "Route lookups that failed.",
            observability.resolver_failures_total,
        ),
        (
            "skyquiz_discarded_targets_total",
            "Quiz targets dropped for unusable route data.",
            observability.discarded_targets_total,
        ),
        (
            "skyquiz_route_cache_hits_total",
            "Selected-aircraft route lookups served from cache.",
            observability.route_cache_hits_total,
        ),
        (
            "skyquiz_persist_failures_total",
            "Failed writes of player stats or high scores.",
            observability.persist_failures_total,
        ),
    ];
    for (name, help, value) in counters {
        write_metric(&mut body, name, "counter", help, value);
    }

    body
}

fn write_metric(body: &mut String, name: &str, kind: &str, help: &str, value: u64) {
    let _ = writeln!(body, "# HELP {name} {help}");
    let _ = writeln!(body, "# TYPE {name} {kind}");
    let _ = writeln!(body, "{name} {value}");
}

/// Latest snapshot. Never waits on the upstream API.
pub async fn get_flights(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let snapshot = state.snapshots.latest().await;
    let etag = flights_etag(snapshot.captured_at.timestamp_millis());

    if if_none_match_matches(&headers, &etag) {
        return not_modified_response("no-cache", Some(etag.as_str()));
    }

    match serde_json::to_vec(&*snapshot) {
        Ok(json) => json_bytes_response(Bytes::from(json), "no-cache", Some(etag.as_str())),
        Err(e) => {
            warn!(error = %e, "failed to serialize snapshot");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_flight(
    State(state): State<AppState>,
    Path(icao24): Path<String>,
) -> Result<Json<AircraftRecord>, StatusCode> {
    state
        .snapshots
        .find(&icao24)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_route(
    State(state): State<AppState>,
    Path(callsign): Path<String>,
) -> Result<Json<RouteDetails>, StatusCode> {
    if callsign.trim().is_empty() || callsign.trim() == MISSING_CALLSIGN {
        return Err(StatusCode::NOT_FOUND);
    }
    let details = resolve_selected(&state, &callsign)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let game = state.game.lock().await;
    Ok(Json(match game.hidden_answer_for_callsign(&callsign) {
        Some(answer) => details.redacted(answer),
        None => details,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SelectionRequest {
    pub icao24: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SelectionView {
    pub icao24: Option<String>,
    /// `None` when nothing is selected or the aircraft left the area.
    pub aircraft: Option<AircraftRecord>,
    pub details: Option<RouteDetails>,
}

pub async fn put_selection(
    State(state): State<AppState>,
    Json(request): Json<SelectionRequest>,
) -> Json<SelectionView> {
    let icao24 = request
        .icao24
        .map(|id| id.trim().to_ascii_lowercase())
        .filter(|id| !id.is_empty());
    *state.selected.write().await = icao24;
    get_selection(State(state)).await
}

pub async fn clear_selection(State(state): State<AppState>) -> StatusCode {
    *state.selected.write().await = None;
    StatusCode::NO_CONTENT
}

pub async fn get_selection(State(state): State<AppState>) -> Json<SelectionView> {
    let icao24 = state.selected.read().await.clone();
    let aircraft = match icao24.as_deref() {
        Some(id) => state.snapshots.find(id).await,
        None => None,
    };
    let mut details = match aircraft.as_ref() {
        Some(record) if record.callsign != MISSING_CALLSIGN => {
            resolve_selected(&state, &record.callsign).await.ok()
        }
        _ => None,
    };

    if let (Some(id), Some(found)) = (icao24.as_deref(), details.as_mut()) {
        let game = state.game.lock().await;
        if let Some(answer) = game.hidden_answer_for(id) {
            *found = found.redacted(answer);
        }
    }

    Json(SelectionView {
        icao24,
        aircraft,
        details,
    })
}

/// Non-blocking tile lookup: 200 with the PNG when cached, 202 while it is being fetched.
pub async fn get_tile(
    State(state): State<AppState>,
    Path((z, x, y)): Path<(u8, i64, i64)>,
) -> Response {
    let Some(key) = TileKey::normalized(z, x, y) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match state.tiles.get_tile(key) {
        TileLookup::Ready(image) => {
            let mut response = Response::new(Body::from(image.png.clone()));
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(TILE_CACHE_CONTROL),
            );
            response
        }
        TileLookup::Pending => (
            StatusCode::ACCEPTED,
            [(header::CACHE_CONTROL, "no-store"), (header::RETRY_AFTER, "1")],
        )
            .into_response(),
    }
}

fn flights_etag(captured_at_millis: i64) -> String {
    format!("\"flights-{captured_at_millis}\"")
}

fn json_bytes_response(body: Bytes, cache_control: &'static str, etag: Option<&str>) -> Response {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(cache_control),
    );
    if let Some(etag) = etag
        && let Ok(etag_header) = HeaderValue::from_str(etag)
    {
        headers.insert(header::ETAG, etag_header);
    }
    response
}

fn not_modified_response(cache_control: &'static str, etag: Option<&str>) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(cache_control),
    );
    if let Some(etag) = etag
        && let Ok(etag_header) = HeaderValue::from_str(etag)
    {
        headers.insert(header::ETAG, etag_header);
    }
    response
}

fn normalize_etag(candidate: &str) -> &str {
    candidate.strip_prefix("W/").unwrap_or(candidate).trim()
}

fn if_none_match_matches(headers: &HeaderMap, etag: &str) -> bool {
    let Some(value) = headers.get(header::IF_NONE_MATCH) else {
        return false;
    };
    let Ok(raw) = value.to_str() else {
        return false;
    };

    raw.split(',').any(|candidate| {
        let candidate = candidate.trim();
        candidate == "*" || normalize_etag(candidate) == normalize_etag(etag)
    })
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
    use skyquiz_shared::{GamePhase, Snapshot};

    use super::{if_none_match_matches, render_prometheus_metrics};
    use crate::state::ObservabilityCounters;
    use crate::test_support::{ScriptedRoute, aircraft, spawn_test_server, test_state};

    #[test]
    fn metrics_output_contains_prometheus_help_type_and_values() {
        let counters = ObservabilityCounters::default();
        counters.record_poll_ok();
        counters.record_poll_rate_limited();
        counters.record_discarded_target();

        let body = render_prometheus_metrics(3, 7, counters.snapshot());
        assert!(body.contains("# HELP skyquiz_aircraft Aircraft in the latest snapshot."));
        assert!(body.contains("# TYPE skyquiz_aircraft gauge"));
        assert!(body.contains("skyquiz_aircraft 3"));
        assert!(body.contains("skyquiz_tiles_cached 7"));
        assert!(body.contains("# TYPE skyquiz_polls_ok_total counter"));
        assert!(body.contains("skyquiz_polls_ok_total 1"));
        assert!(body.contains("skyquiz_polls_rate_limited_total 1"));
        assert!(body.contains("skyquiz_discarded_targets_total 1"));
        assert!(body.contains("skyquiz_tile_fetches_failed_total 0"));
    }

    #[test]
    fn if_none_match_supports_weak_and_multiple_etags() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::IF_NONE_MATCH,
            HeaderValue::from_static("\"other\", W/\"flights-42\""),
        );
        assert!(if_none_match_matches(&headers, "\"flights-42\""));
        assert!(!if_none_match_matches(&headers, "\"flights-43\""));
        assert!(!if_none_match_matches(&HeaderMap::new(), "\"flights-42\""));
    }

    #[tokio::test]
    async fn flights_endpoints_serve_latest_snapshot_and_lookup_by_identity() {
        let (state, _dir) = test_state(ScriptedRoute::always("Helsinki", "Paris"));
        state
            .snapshots
            .seed(Snapshot::new(
                vec![aircraft("abc123", "SAS1"), aircraft("def456", "FIN2")],
                None,
            ))
            .await;
        let (addr, server_handle) = spawn_test_server(crate::app::build_app(state)).await;
        let base_url = format!("http://{addr}");
        let client = reqwest::Client::new();

        let resp = client
            .get(format!("{base_url}/api/flights"))
            .send()
            .await
            .expect("flights request");
        assert_eq!(resp.status(), StatusCode::OK);
        let etag = resp
            .headers()
            .get(header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .expect("etag header");
        let body = resp.json::<serde_json::Value>().await.expect("flights json");
        assert_eq!(body["aircraft"].as_array().map(Vec::len), Some(2));

        let not_modified = client
            .get(format!("{base_url}/api/flights"))
            .header(header::IF_NONE_MATCH, etag)
            .send()
            .await
            .expect("conditional request");
        assert_eq!(not_modified.status(), StatusCode::NOT_MODIFIED);

        let record = client
            .get(format!("{base_url}/api/flights/def456"))
            .send()
            .await
            .expect("flight request")
            .json::<serde_json::Value>()
            .await
            .expect("flight json");
        assert_eq!(record["callsign"], "FIN2");

        let gone = client
            .get(format!("{base_url}/api/flights/zzz999"))
            .send()
            .await
            .expect("missing flight request");
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);

        server_handle.abort();
    }

    #[tokio::test]
    async fn selection_tracks_identity_and_reports_disappearance() {
        let (state, _dir) = test_state(ScriptedRoute::always("Helsinki", "Paris"));
        state
            .snapshots
            .seed(Snapshot::new(vec![aircraft("abc123", "SAS1")], None))
            .await;
        let snapshots = state.snapshots.clone();
        let (addr, server_handle) = spawn_test_server(crate::app::build_app(state)).await;
        let url = format!("http://{addr}/api/selection");
        let client = reqwest::Client::new();

        let selected = client
            .put(&url)
            .json(&serde_json::json!({"icao24": "ABC123"}))
            .send()
            .await
            .expect("select request")
            .json::<serde_json::Value>()
            .await
            .expect("selection json");
        assert_eq!(selected["icao24"], "abc123");
        assert_eq!(selected["aircraft"]["callsign"], "SAS1");
        assert_eq!(selected["details"]["real_destination"], "Paris");

        snapshots.seed(Snapshot::new(Vec::new(), None)).await;
        let after = client
            .get(&url)
            .send()
            .await
            .expect("selection request")
            .json::<serde_json::Value>()
            .await
            .expect("selection json");
        assert_eq!(after["icao24"], "abc123");
        assert!(after["aircraft"].is_null());
        assert!(after["details"].is_null());

        let cleared = client.delete(&url).send().await.expect("clear request");
        assert_eq!(cleared.status(), StatusCode::NO_CONTENT);
        let empty = client
            .get(&url)
            .send()
            .await
            .expect("selection request")
            .json::<serde_json::Value>()
            .await
            .expect("selection json");
        assert!(empty["icao24"].is_null());

        server_handle.abort();
    }

    #[tokio::test]
    async fn active_quiz_target_route_is_redacted_until_guessed() {
        let (state, _dir) = test_state(ScriptedRoute::always("Helsinki", "Paris"));
        state
            .snapshots
            .seed(Snapshot::new(vec![aircraft("abc123", "SAS1")], None))
            .await;
        {
            let start = Instant::now();
            let mut game = state.game.lock().await;
            game.login("ada").await.expect("login");
            game.start_game(start).await.expect("game starts");
            for _ in 0..5_000 {
                game.update(start).await;
                if game.phase() == GamePhase::Playing {
                    break;
                }
                tokio::task::yield_now().await;
            }
            assert_eq!(game.phase(), GamePhase::Playing);
        }
        let game = state.game.clone();
        let (addr, server_handle) = spawn_test_server(crate::app::build_app(state)).await;
        let client = reqwest::Client::new();

        let selected = client
            .put(format!("http://{addr}/api/selection"))
            .json(&serde_json::json!({"icao24": "abc123"}))
            .send()
            .await
            .expect("select request")
            .json::<serde_json::Value>()
            .await
            .expect("selection json");
        assert_eq!(selected["details"]["real_destination"], "???");
        assert_eq!(selected["details"]["origin"], "Helsinki");
        assert!(!selected.to_string().contains("Paris"));

        let resolved = client
            .get(format!("http://{addr}/api/resolve/sas1"))
            .send()
            .await
            .expect("resolve request")
            .json::<serde_json::Value>()
            .await
            .expect("route json");
        assert_eq!(resolved["destination"], "???");

        game.lock()
            .await
            .submit_guess("Berlin", Instant::now())
            .expect("guess accepted");
        let revealed = client
            .get(format!("http://{addr}/api/selection"))
            .send()
            .await
            .expect("selection request")
            .json::<serde_json::Value>()
            .await
            .expect("selection json");
        assert_eq!(revealed["details"]["real_destination"], "Paris");

        server_handle.abort();
    }

    #[tokio::test]
    async fn route_lookup_failures_map_to_not_found() {
        let (state, _dir) = test_state(ScriptedRoute::failing());
        let (addr, server_handle) = spawn_test_server(crate::app::build_app(state)).await;

        let resp = reqwest::get(format!("http://{addr}/api/resolve/SAS1"))
            .await
            .expect("resolve request");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        server_handle.abort();
    }

    #[tokio::test]
    async fn invalid_tile_rows_are_not_found_and_valid_ones_are_accepted() {
        let (state, _dir) = test_state(ScriptedRoute::always("Helsinki", "Paris"));
        let tiles = state.tiles.clone();
        let (addr, server_handle) = spawn_test_server(crate::app::build_app(state)).await;
        let client = reqwest::Client::new();

        let invalid = client
            .get(format!("http://{addr}/api/tiles/3/1/8"))
            .send()
            .await
            .expect("tile request");
        assert_eq!(invalid.status(), StatusCode::NOT_FOUND);

        let pending = client
            .get(format!("http://{addr}/api/tiles/3/-1/2"))
            .send()
            .await
            .expect("tile request");
        assert_eq!(pending.status(), StatusCode::ACCEPTED);
        assert!(tiles.is_pending(&skyquiz_shared::TileKey { z: 3, x: 7, y: 2 }));

        server_handle.abort();
    }

    #[tokio::test]
    async fn health_and_metrics_expose_expected_contract() {
        let (state, _dir) = test_state(ScriptedRoute::always("Helsinki", "Paris"));
        let (addr, server_handle) = spawn_test_server(crate::app::build_app(state)).await;
        let base_url = format!("http://{addr}");
        let client = reqwest::Client::new();

        let health = client
            .get(format!("{base_url}/api/health"))
            .send()
            .await
            .expect("health request")
            .error_for_status()
            .expect("health status")
            .json::<serde_json::Value>()
            .await
            .expect("parse health");
        assert_eq!(health.get("status").and_then(|v| v.as_str()), Some("ok"));
        assert_eq!(health.get("aircraft").and_then(|v| v.as_u64()), Some(0));
        assert!(
            health
                .get("observability")
                .and_then(|v| v.get("polls_ok_total"))
                .and_then(|v| v.as_u64())
                .is_some()
        );

        let metrics = client
            .get(format!("{base_url}/api/metrics"))
            .send()
            .await
            .expect("metrics request")
            .error_for_status()
            .expect("metrics status")
            .text()
            .await
            .expect("parse metrics text");
        assert!(metrics.contains("# TYPE skyquiz_polls_ok_total counter"));
        assert!(metrics.contains("skyquiz_aircraft 0"));

        server_handle.abort();
        let _ = server_handle.await;
    }
}
