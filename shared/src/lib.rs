pub mod aircraft;
pub mod geo;
pub mod quiz;
pub mod route;
pub mod tiles;

pub use aircraft::{AircraftRecord, Snapshot};
pub use quiz::*;
pub use route::{HIDDEN_LABEL, RouteDetails, UNKNOWN_LABEL, is_known_label};
pub use tiles::TileKey;
