//! services/api/src/bin/api.rs

use api_lib::{
    adapters::ChromeLauncher,
    config::Config,
    error::ApiError,
    web::{build_router, AppState},
};
use schedule_rpa_core::{SchedulingService, SessionManager};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Build the Browser Session ---
    // The session stays uninitialized until the first request brings credentials.
    let launcher = Arc::new(ChromeLauncher::new(config.browser_config()));
    match &config.cdp_endpoint {
        Some(endpoint) => info!(%endpoint, "Attaching to an existing browser."),
        None => info!(headless = config.browser_headless, "Chrome will be launched on demand."),
    }
    let session = SessionManager::new(config.session_config(), launcher);
    let service = SchedulingService::new(session.clone(), config.engine_config());

    let shutdown = CancellationToken::new();
    let keep_alive = session.spawn_keep_alive(shutdown.clone());

    // --- 3. Build the Shared AppState & Router ---
    let app_state = Arc::new(AppState {
        service: service.clone(),
        config: config.clone(),
    });
    let app = build_router(app_state);

    // --- 4. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_ctrl_c(shutdown.clone()))
        .await?;

    // --- 5. Tear Down ---
    shutdown.cancel();
    if let Err(e) = keep_alive.await {
        error!(error = %e, "Keep-alive task ended abnormally.");
    }
    service.close().await;
    info!("Browser session closed. Bye.");
    Ok(())
}

async fn wait_for_ctrl_c(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for ctrl-c.");
            }
            info!("Shutdown requested.");
        }
        _ = shutdown.cancelled() => {}
    }
}
