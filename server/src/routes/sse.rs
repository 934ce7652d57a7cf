use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use bytes::Bytes;
use futures::stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::config::SSE_KEEPALIVE_SECS;
use crate::state::AppState;

/// Live aircraft feed: the latest snapshot on connect, then one event per published poll.
pub async fn flight_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        if let Some(event) = latest_snapshot_event(&state).await {
            yield Ok(event);
        }

        let mut updates = BroadcastStream::new(state.event_tx.subscribe());
        while let Some(result) = updates.next().await {
            match result {
                Ok(event) => {
                    let Some(payload) = event_payload(event.json.as_ref()) else {
                        warn!(seq = event.seq, "snapshot payload is not valid utf-8; dropping SSE event");
                        continue;
                    };
                    yield Ok(
                        Event::default()
                            .id(event.seq.to_string())
                            .event("snapshot")
                            .data(payload),
                    );
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(
                        skipped_events = skipped,
                        "SSE client lagged behind broadcast buffer; replaying latest snapshot"
                    );
                    if let Some(event) = latest_snapshot_event(&state).await {
                        yield Ok(event);
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEPALIVE_SECS))
            .text("keep-alive"),
    )
}

async fn latest_snapshot_event(state: &AppState) -> Option<Event> {
    let (seq, data) = {
        let feed = state.live_feed.read().await;
        (feed.seq, feed.snapshot_json.clone())
    };
    if data.is_empty() {
        return None;
    }
    let Some(payload) = event_payload(data.as_ref()) else {
        warn!(seq, "snapshot payload is not valid utf-8; skipping SSE snapshot");
        return None;
    };
    Some(
        Event::default()
            .id(seq.to_string())
            .event("snapshot")
            .data(payload),
    )
}

fn event_payload(bytes: &Bytes) -> Option<&str> {
    std::str::from_utf8(bytes.as_ref()).ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use futures::StreamExt;

    use crate::state::SnapshotEvent;
    use crate::test_support::{ScriptedRoute, spawn_test_server, test_state};

    async fn read_until(
        body: &mut (impl futures::Stream<Item = reqwest::Result<Bytes>> + Unpin),
        needle: &str,
    ) -> String {
        let mut seen = String::new();
        while !seen.contains(needle) {
            let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
                .await
                .expect("sse chunk before timeout")
                .expect("stream still open")
                .expect("chunk bytes");
            seen.push_str(&String::from_utf8_lossy(&chunk));
        }
        seen
    }

    #[tokio::test]
    async fn new_clients_get_latest_snapshot_then_live_updates() {
        let (state, _dir) = test_state(ScriptedRoute::always("Helsinki", "Paris"));
        {
            let mut feed = state.live_feed.write().await;
            feed.seq = 4;
            feed.snapshot_json = Arc::new(Bytes::from_static(b"{\"aircraft\":[\"first\"]}"));
        }
        let event_tx = state.event_tx.clone();
        let (addr, server_handle) = spawn_test_server(crate::app::build_app(state)).await;

        let resp = reqwest::get(format!("http://{addr}/api/events"))
            .await
            .expect("events request");
        let mut body = Box::pin(resp.bytes_stream());

        let initial = read_until(&mut body, "first").await;
        assert!(initial.contains("event: snapshot"));
        assert!(initial.contains("id: 4"));

        while event_tx.receiver_count() == 0 {
            tokio::task::yield_now().await;
        }
        event_tx
            .send(SnapshotEvent {
                seq: 5,
                json: Arc::new(Bytes::from_static(b"{\"aircraft\":[\"second\"]}")),
            })
            .expect("subscriber connected");

        let update = read_until(&mut body, "second").await;
        assert!(update.contains("id: 5"));

        server_handle.abort();
    }
}
