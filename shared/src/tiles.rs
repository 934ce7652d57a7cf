use serde::{Deserialize, Serialize};

/// Deepest zoom level the basemap serves.
pub const MAX_ZOOM: u8 = 20;

/// Identity of one basemap tile image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    /// Number of tiles along one axis at `zoom`.
    pub fn tiles_per_axis(zoom: u8) -> i64 {
        1_i64 << zoom
    }

    /// Build a key from raw tile indices, wrapping x around the antimeridian.
    ///
    /// Returns `None` for rows above or below the map and for zooms past [`MAX_ZOOM`].
    pub fn normalized(zoom: u8, x: i64, y: i64) -> Option<Self> {
        if zoom > MAX_ZOOM {
            return None;
        }
        let count = Self::tiles_per_axis(zoom);
        if !(0..count).contains(&y) {
            return None;
        }
        let x = x.rem_euclid(count);
        Some(Self {
            z: zoom,
            x: u32::try_from(x).ok()?,
            y: u32::try_from(y).ok()?,
        })
    }

    /// Expand a `{z}/{x}/{y}` URL template.
    pub fn fill_template(&self, template: &str) -> String {
        template
            .replace("{z}", &self.z.to_string())
            .replace("{x}", &self.x.to_string())
            .replace("{y}", &self.y.to_string())
    }
}
