pub mod game_loop;
pub mod route_cache_evictor;
pub mod route_resolver;
pub mod snapshot_cache;
pub mod snapshot_poller;
pub mod tile_cache;
