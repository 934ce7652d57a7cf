use std::f64::consts::PI;

use crate::tiles::TileKey;

pub const TILE_SIZE: f64 = 256.0;
pub const EARTH_RADIUS_KM: f64 = 6371.0;

fn world_size(zoom: u8) -> f64 {
    2f64.powi(i32::from(zoom)) * TILE_SIZE
}

/// Web-Mercator pixel coordinates of a point at `zoom`. `y` grows southward.
///
/// Undefined at exactly ±90° latitude.
pub fn project(lat: f64, lon: f64, zoom: u8) -> (f64, f64) {
    let size = world_size(zoom);
    let x = (lon + 180.0) / 360.0 * size;

    let lat_rad = lat.to_radians();
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * size;

    (x, y)
}

/// Inverse of [`project`].
pub fn unproject(x: f64, y: f64, zoom: u8) -> (f64, f64) {
    let size = world_size(zoom);
    let lon = x / size * 360.0 - 180.0;

    let n = PI - 2.0 * PI * y / size;
    let lat = n.sinh().atan().to_degrees();

    (lat, lon)
}

/// Haversine distance in kilometres.
pub fn great_circle_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// A tile that intersects the viewport, with the screen position of its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleTile {
    pub key: TileKey,
    pub screen_x: f64,
    pub screen_y: f64,
}

/// Enumerate the tiles covering a `width` x `height` viewport centred on a point.
///
/// Tile x wraps at the antimeridian; rows outside the map are skipped.
pub fn visible_tiles(
    center_lat: f64,
    center_lon: f64,
    zoom: u8,
    width: f64,
    height: f64,
) -> Vec<VisibleTile> {
    let (center_x, center_y) = project(center_lat, center_lon, zoom);
    let min_wx = center_x - width / 2.0;
    let min_wy = center_y - height / 2.0;

    let min_tile_x = (min_wx / TILE_SIZE).floor() as i64;
    let max_tile_x = ((center_x + width / 2.0) / TILE_SIZE).floor() as i64;
    let min_tile_y = (min_wy / TILE_SIZE).floor() as i64;
    let max_tile_y = ((center_y + height / 2.0) / TILE_SIZE).floor() as i64;

    let mut tiles = Vec::new();
    for x in min_tile_x..=max_tile_x {
        for y in min_tile_y..=max_tile_y {
            let Some(key) = TileKey::normalized(zoom, x, y) else {
                continue;
            };
            tiles.push(VisibleTile {
                key,
                screen_x: x as f64 * TILE_SIZE - min_wx,
                screen_y: y as f64 * TILE_SIZE - min_wy,
            });
        }
    }
    tiles
}
