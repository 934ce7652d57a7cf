use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use skyquiz_shared::Snapshot;
use tracing::{debug, warn};

use crate::errors::SnapshotError;
use crate::state::{AppState, SnapshotEvent};

pub async fn run(state: AppState) {
    let mut interval = tokio::time::interval(state.settings.poll_interval);
    let mut last_published: Option<Arc<Snapshot>> = None;

    loop {
        interval.tick().await;
        poll_once(&state, &mut last_published).await;
    }
}

async fn poll_once(state: &AppState, last_published: &mut Option<Arc<Snapshot>>) {
    let settings = &state.settings;
    match state
        .snapshots
        .fetch_snapshot(settings.home_lat, settings.home_lon, settings.query_radius_deg)
        .await
    {
        Ok(snapshot) => {
            state.observability.record_poll_ok();
            // Cache hits hand back the snapshot that was already published.
            if last_published
                .as_ref()
                .is_some_and(|previous| Arc::ptr_eq(previous, &snapshot))
            {
                return;
            }
            publish_snapshot(state, &snapshot).await;
            *last_published = Some(snapshot);
        }
        Err(stale) => {
            match &stale.error {
                SnapshotError::RateLimited => state.observability.record_poll_rate_limited(),
                _ => state.observability.record_poll_failed(),
            }
            warn!(
                aircraft = stale.last_known.len(),
                malformed = stale.error.is_malformed(),
                "snapshot refresh failed, keeping last known data: {}",
                stale.error
            );
        }
    }
}

async fn publish_snapshot(state: &AppState, snapshot: &Snapshot) {
    let json = match serde_json::to_vec(snapshot) {
        Ok(json) => Arc::new(Bytes::from(json)),
        Err(e) => {
            warn!(error = %e, "failed to serialize snapshot event");
            return;
        }
    };

    let seq = state.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
    {
        let mut feed = state.live_feed.write().await;
        feed.seq = seq;
        feed.snapshot_json = Arc::clone(&json);
    }

    // No subscribers is not an error.
    let receivers = state.event_tx.send(SnapshotEvent { seq, json }).unwrap_or(0);
    debug!(seq, aircraft = snapshot.len(), receivers, "published snapshot");
}
