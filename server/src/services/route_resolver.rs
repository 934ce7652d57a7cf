use std::cmp::Ordering;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use reqwest::{StatusCode, header};
use serde_json::{Map, Value};
use skyquiz_shared::RouteDetails;
use tracing::{debug, warn};

use crate::config::{BROWSER_USER_AGENT, ROUTE_CACHE_TTL_SECS};
use crate::errors::ResolveError;
use crate::state::{AppState, CachedRoute};

static BOOTSTRAP_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(?:var\s+)?trackpollBootstrap\s*=\s*(\{.+?\});").unwrap()
});

/// Source of route metadata for a callsign.
#[async_trait]
pub trait RouteLookup: Send + Sync {
    async fn resolve_route(&self, callsign: &str) -> Result<RouteDetails, ResolveError>;
}

/// Scrapes the public flight-tracking page for a callsign.
pub struct FlightPageResolver {
    client: reqwest::Client,
    base_url: String,
}

impl FlightPageResolver {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl RouteLookup for FlightPageResolver {
    async fn resolve_route(&self, callsign: &str) -> Result<RouteDetails, ResolveError> {
        let url = format!("{}/{}", self.base_url, callsign.trim());
        let resp = self
            .client
            .get(&url)
            .header(header::USER_AGENT, BROWSER_USER_AGENT)
            .header(
                header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(ResolveError::Status(status.as_u16()));
        }

        let body = resp.text().await?;
        parse_flight_page(&body)
    }
}

/// Extract route details from the embedded bootstrap object of a flight page.
pub fn parse_flight_page(html: &str) -> Result<RouteDetails, ResolveError> {
    let raw = BOOTSTRAP_MARKER
        .captures(html)
        .and_then(|caps| caps.get(1))
        .ok_or(ResolveError::MarkerNotFound)?
        .as_str();

    let data: Value = serde_json::from_str(raw)?;
    let flights = data
        .get("flights")
        .and_then(Value::as_object)
        .ok_or(ResolveError::MissingFlights)?;

    let entry = latest_activity_entry(flights).ok_or(ResolveError::NoActivityLog)?;

    let destination = label_with_fallback(entry, "destination", "friendlyLocation", "iata");
    let model = label_with_fallback(entry, "aircraft", "friendlyType", "type");
    let origin = label_with_fallback(entry, "origin", "friendlyLocation", "iata");

    Ok(RouteDetails {
        destination: destination.clone(),
        real_destination: destination,
        model,
        origin,
    })
}

/// First activity-log entry of the most recent flight.
///
/// Flight ids look like `<ident>-<epoch>-...`; the greatest epoch wins, then the
/// greatest id. The log itself is listed most-recent-first.
fn latest_activity_entry(flights: &Map<String, Value>) -> Option<&Map<String, Value>> {
    let mut ids: Vec<&String> = flights.keys().collect();
    ids.sort_by(|a, b| compare_flight_ids(b, a));

    ids.into_iter().find_map(|id| {
        flights
            .get(id)?
            .get("activityLog")?
            .get("flights")?
            .as_array()?
            .first()?
            .as_object()
    })
}

fn compare_flight_ids(a: &str, b: &str) -> Ordering {
    match (flight_epoch(a), flight_epoch(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

fn flight_epoch(id: &str) -> Option<i64> {
    id.split('-').nth(1)?.parse().ok()
}

fn nested_str<'a>(entry: &'a Map<String, Value>, object: &str, field: &str) -> Option<&'a str> {
    entry.get(object)?.get(field)?.as_str()
}

fn label_with_fallback(
    entry: &Map<String, Value>,
    object: &str,
    preferred: &str,
    fallback: &str,
) -> String {
    nested_str(entry, object, preferred)
        .or_else(|| nested_str(entry, object, fallback))
        .unwrap_or_default()
        .to_string()
}

/// Route details for a user-selected aircraft, memoized by callsign.
///
/// Both legs are recorded as known airports so later quiz rounds can use them as distractors.
pub async fn resolve_selected(state: &AppState, callsign: &str) -> Result<RouteDetails, ResolveError> {
    let key = callsign.trim().to_ascii_uppercase();

    if let Some(cached) = state.route_cache.get(&key) {
        let age = Utc::now().signed_duration_since(cached.cached_at).num_seconds();
        if age < ROUTE_CACHE_TTL_SECS {
            state.observability.record_route_cache_hit();
            return Ok(cached.details.clone());
        }
    }

    let details = match state.resolver.resolve_route(&key).await {
        Ok(details) => {
            state.observability.record_resolver_success();
            details
        }
        Err(e) => {
            state.observability.record_resolver_failure();
            warn!(callsign = %key, malformed = e.is_malformed(), "route lookup failed: {e}");
            return Err(e);
        }
    };

    for label in [&details.real_destination, &details.origin] {
        if let Err(e) = state.store.save_airport(label).await {
            warn!(error = %e, "failed to record airport label");
        }
    }

    debug!(callsign = %key, destination = %details.real_destination, "resolved selected aircraft route");
    state.route_cache.insert(
        key,
        CachedRoute {
            details: details.clone(),
            cached_at: Utc::now(),
        },
    );
    Ok(details)
}
