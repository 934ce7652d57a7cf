use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use skyquiz_shared::{GameView, GuessOutcome, Leaderboard, UserStats};
use tracing::warn;

use crate::errors::{GameError, StoreError};
use crate::state::AppState;

impl IntoResponse for GameError {
    fn into_response(self) -> Response {
        let status = match self {
            GameError::NotLoggedIn => StatusCode::UNAUTHORIZED,
            GameError::AlreadyRunning => StatusCode::CONFLICT,
            GameError::EmptyName => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

fn store_failure(error: StoreError) -> StatusCode {
    warn!(error = %error, "game store request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

pub async fn get_game(State(state): State<AppState>) -> Json<GameView> {
    let game = state.game.lock().await;
    Json(game.view().await)
}

pub async fn start_game(State(state): State<AppState>) -> Result<Json<GameView>, GameError> {
    let mut game = state.game.lock().await;
    game.start_game(Instant::now()).await?;
    Ok(Json(game.view().await))
}

#[derive(Debug, Deserialize)]
pub struct GuessRequest {
    pub choice: String,
}

/// 409 when no question is open or it was already answered.
pub async fn submit_guess(
    State(state): State<AppState>,
    Json(request): Json<GuessRequest>,
) -> Result<Json<GuessOutcome>, StatusCode> {
    let mut game = state.game.lock().await;
    game.submit_guess(&request.choice, Instant::now())
        .map(Json)
        .ok_or(StatusCode::CONFLICT)
}

pub async fn quit_game(State(state): State<AppState>) -> Json<GameView> {
    let mut game = state.game.lock().await;
    game.quit().await;
    Json(game.view().await)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub name: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<UserStats>, GameError> {
    let mut game = state.game.lock().await;
    game.login(&request.name).await.map(Json)
}

pub async fn logout(State(state): State<AppState>) -> StatusCode {
    state.game.lock().await.logout().await;
    StatusCode::NO_CONTENT
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<UserStats>, StatusCode> {
    state
        .store
        .find_user(&name)
        .await
        .map_err(store_failure)?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> StatusCode {
    match state.store.delete_user(&name).await {
        Ok(true) => StatusCode::NO_CONTENT,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(e) => store_failure(e),
    }
}

pub async fn get_scores(State(state): State<AppState>) -> Result<Json<Leaderboard>, StatusCode> {
    state
        .store
        .leaderboard()
        .await
        .map(Json)
        .map_err(store_failure)
}
