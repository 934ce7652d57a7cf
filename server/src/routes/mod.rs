pub mod api;
pub mod game;
pub mod sse;
