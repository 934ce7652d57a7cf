use std::time::Instant;

use tokio::time::MissedTickBehavior;

use crate::config::FRAME_INTERVAL;
use crate::state::AppState;

/// Frame ticker: the only place tile completions enter the cache and quiz timers fire.
pub async fn run(state: AppState) {
    let mut interval = tokio::time::interval(FRAME_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        tick(&state, Instant::now()).await;
    }
}

async fn tick(state: &AppState, now: Instant) {
    state.tiles.drain();
    state.game.lock().await.update(now).await;
}
