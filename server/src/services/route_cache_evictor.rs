use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;

use crate::config::{ROUTE_CACHE_EVICTION_SECS, ROUTE_CACHE_TTL_SECS};
use crate::state::{AppState, CachedRoute};

pub async fn run(state: AppState) {
    let mut interval = tokio::time::interval(Duration::from_secs(ROUTE_CACHE_EVICTION_SECS));

    loop {
        interval.tick().await;

        let evicted = evict_stale(&state.route_cache, Utc::now());
        if evicted > 0 {
            info!(
                "evicted {evicted} stale route cache entries ({} remaining)",
                state.route_cache.len()
            );
        }
    }
}

/// Counts removals inside `retain`; lookups may insert concurrently.
fn evict_stale(cache: &DashMap<String, CachedRoute>, now: DateTime<Utc>) -> usize {
    let mut evicted = 0;
    cache.retain(|_, cached| {
        let fresh =
            now.signed_duration_since(cached.cached_at).num_seconds() < ROUTE_CACHE_TTL_SECS;
        if !fresh {
            evicted += 1;
        }
        fresh
    });
    evicted
}
