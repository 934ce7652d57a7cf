use std::path::Path;

use axum::{
    Router,
    extract::Request,
    http::{HeaderValue, Method, header},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;

use crate::config::static_dir;
use crate::routes;
use crate::state::AppState;

pub(crate) fn build_app(state: AppState) -> Router {
    let static_assets = Router::new()
        .fallback_service(
            ServeDir::new(static_dir())
                .precompressed_br()
                .precompressed_gzip(),
        )
        .layer(middleware::from_fn(set_static_cache_control));

    let app = Router::new()
        .route("/api/flights", get(routes::api::get_flights))
        .route("/api/flights/{icao24}", get(routes::api::get_flight))
        .route("/api/resolve/{callsign}", get(routes::api::get_route))
        .route(
            "/api/selection",
            get(routes::api::get_selection)
                .put(routes::api::put_selection)
                .delete(routes::api::clear_selection),
        )
        .route("/api/tiles/{z}/{x}/{y}", get(routes::api::get_tile))
        .route("/api/events", get(routes::sse::flight_events))
        .route("/api/game", get(routes::game::get_game))
        .route("/api/game/start", post(routes::game::start_game))
        .route("/api/game/guess", post(routes::game::submit_guess))
        .route("/api/game/quit", post(routes::game::quit_game))
        .route(
            "/api/session",
            post(routes::game::login).delete(routes::game::logout),
        )
        .route(
            "/api/users/{name}",
            get(routes::game::get_user).delete(routes::game::delete_user),
        )
        .route("/api/scores", get(routes::game::get_scores))
        .route("/api/health", get(routes::api::health))
        .route("/api/metrics", get(routes::api::metrics));

    app.layer(CompressionLayer::new())
        .layer(local_renderer_cors())
        .fallback_service(static_assets)
        .with_state(state)
}

/// Renderer dev servers run on a different local port.
fn local_renderer_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::IF_NONE_MATCH])
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _req| {
            origin.to_str().is_ok_and(is_local_origin)
        }))
}

fn is_local_origin(origin: &str) -> bool {
    ["http://", "https://"].iter().any(|scheme| {
        origin.strip_prefix(scheme).is_some_and(|rest| {
            ["localhost", "127.0.0.1"].iter().any(|host| {
                rest.strip_prefix(host)
                    .is_some_and(|after| after.is_empty() || after.starts_with(':'))
            })
        })
    })
}

async fn set_static_cache_control(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();
    let mut response = next.run(request).await;

    if response.status().is_success()
        && let Some(cache_control) = cache_control_for_path(&path)
    {
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(cache_control),
        );
    }

    response
}

fn cache_control_for_path(path: &str) -> Option<&'static str> {
    if is_hashed_bundle_asset(path) {
        return Some("public, max-age=31536000, immutable");
    }

    if path.starts_with("/fonts/") || path.starts_with("/icons/") || path.starts_with("/sounds/")
    {
        return Some("public, max-age=86400");
    }

    None
}

fn is_hashed_bundle_asset(path: &str) -> bool {
    let Some(ext) = Path::new(path).extension().and_then(|ext| ext.to_str()) else {
        return false;
    };

    if !matches!(ext, "wasm" | "js" | "css") {
        return false;
    }

    let Some(filename) = Path::new(path).file_name().and_then(|name| name.to_str()) else {
        return false;
    };

    filename
        .split(['-', '_', '.'])
        .any(|segment| segment.len() >= 8 && segment.chars().all(|c| c.is_ascii_hexdigit()))
}
