use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use reqwest::StatusCode;
use skyquiz_shared::TileKey;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::TILE_COMPLETION_QUEUE;
use crate::errors::TileError;
use crate::state::ObservabilityCounters;

/// A decoded basemap tile. `png` keeps the original bytes for re-serving.
#[derive(Debug)]
pub struct TileImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    pub png: Bytes,
}

/// Result of a non-blocking tile lookup.
#[derive(Debug, Clone)]
pub enum TileLookup {
    Ready(Arc<TileImage>),
    /// Not cached yet; a fetch is in flight (possibly started by this call).
    Pending,
}

type Completion = (TileKey, Result<TileImage, TileError>);

#[derive(Default)]
struct TileState {
    entries: HashMap<TileKey, Arc<TileImage>>,
    pending: HashSet<TileKey>,
}

/// Basemap tiles, fetched once per key and kept for the life of the process.
///
/// Fetch tasks never touch `state`; their results go through a bounded queue that only
/// [`TileCache::drain`] consumes.
pub struct TileCache {
    client: reqwest::Client,
    url_template: String,
    state: Mutex<TileState>,
    completions_tx: mpsc::Sender<Completion>,
    completions_rx: Mutex<mpsc::Receiver<Completion>>,
    observability: Arc<ObservabilityCounters>,
}

impl TileCache {
    pub fn new(
        client: reqwest::Client,
        url_template: String,
        observability: Arc<ObservabilityCounters>,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::channel(TILE_COMPLETION_QUEUE);
        Self {
            client,
            url_template,
            state: Mutex::new(TileState::default()),
            completions_tx,
            completions_rx: Mutex::new(completions_rx),
            observability,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TileState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the cached tile or starts fetching it. Never waits on the network.
    pub fn get_tile(&self, key: TileKey) -> TileLookup {
        {
            let mut state = self.lock_state();
            if let Some(image) = state.entries.get(&key) {
                return TileLookup::Ready(Arc::clone(image));
            }
            if !state.pending.insert(key) {
                return TileLookup::Pending;
            }
        }

        self.observability.record_tile_fetch_started();
        let client = self.client.clone();
        let url = key.fill_template(&self.url_template);
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = fetch_and_decode(&client, &url).await;
            if tx.send((key, result)).await.is_err() {
                debug!(?key, "tile cache dropped before fetch completed");
            }
        });

        TileLookup::Pending
    }

    /// Move completed fetches into the cache. Failed keys become fetchable again.
    ///
    /// Returns how many completions were consumed.
    pub fn drain(&self) -> usize {
        let mut rx = self
            .completions_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut drained = 0;

        while let Ok((key, result)) = rx.try_recv() {
            drained += 1;
            let mut state = self.lock_state();
            state.pending.remove(&key);
            match result {
                Ok(image) => {
                    state.entries.insert(key, Arc::new(image));
                }
                Err(e) => {
                    self.observability.record_tile_fetch_failed();
                    warn!(z = key.z, x = key.x, y = key.y, "tile fetch failed: {e}");
                }
            }
        }

        drained
    }

    pub fn is_pending(&self, key: &TileKey) -> bool {
        self.lock_state().pending.contains(key)
    }

    pub fn cached_count(&self) -> usize {
        self.lock_state().entries.len()
    }
}

async fn fetch_and_decode(client: &reqwest::Client, url: &str) -> Result<TileImage, TileError> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if status != StatusCode::OK {
        return Err(TileError::Status(status.as_u16()));
    }
    let png = resp.bytes().await?;
    decode_png(png)
}

fn decode_png(png: Bytes) -> Result<TileImage, TileError> {
    let decoded = image::load_from_memory_with_format(&png, image::ImageFormat::Png)?.into_rgba8();
    Ok(TileImage {
        width: decoded.width(),
        height: decoded.height(),
        rgba: decoded.into_raw(),
        png,
    })
}

#[cfg(test)]
pub(crate) fn solid_png(width: u32, height: u32) -> Vec<u8> {
    let pixels = image::RgbaImage::from_pixel(width, height, image::Rgba([12, 34, 56, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(pixels)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode test png");
    out.into_inner()
}
