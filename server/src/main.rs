mod app;
mod config;
mod errors;
mod quiz;
mod routes;
mod services;
mod state;
mod store;
#[cfg(test)]
mod test_support;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::from_env();
    tracing::info!(
        home_lat = settings.home_lat,
        home_lon = settings.home_lon,
        radius_deg = settings.query_radius_deg,
        authenticated = settings.credentials.is_some(),
        data_dir = %settings.data_dir.display(),
        "Loaded settings"
    );
    if let Err(e) = tokio::fs::create_dir_all(&settings.data_dir).await {
        tracing::error!(error = %e, "failed to create data directory");
        return;
    }

    let state = AppState::new(settings);
    match state.store.load_airports().await {
        Ok(airports) => tracing::info!(airports = airports.len(), "Airport pool loaded"),
        Err(e) => tracing::warn!(error = %e, "failed to load airport pool"),
    }

    // Spawn background services
    tokio::spawn(services::snapshot_poller::run(state.clone()));
    tokio::spawn(services::route_cache_evictor::run(state.clone()));
    tokio::spawn(services::game_loop::run(state.clone()));

    let app = app::build_app(state);

    let addr = format!("0.0.0.0:{}", config::server_port());
    tracing::info!("Sky quiz server listening on {addr}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind TCP listener");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server failed");
    }

    tracing::info!("Server shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
