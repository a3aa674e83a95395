pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;

pub use middleware::require_rpa_headers;
pub use rest::ApiDoc;
pub use state::AppState;

use axum::{
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Builds the complete application: the REST routes, CORS, request tracing
/// and the Swagger UI.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Public routes (no vendor headers required)
    let public_routes = Router::new()
        .route("/health", get(rest::health_handler))
        .route("/status", get(rest::status_handler));

    // Routes that drive the browser session
    let session_routes = Router::new()
        .route("/slots", get(rest::slots_handler))
        .route("/reservations/search", get(rest::search_reservations_handler))
        .route(
            "/reservations",
            post(rest::create_reservation_handler)
                .put(rest::update_reservation_handler)
                .delete(rest::cancel_reservation_handler),
        )
        .route("/reservations/delete", post(rest::delete_reservation_handler))
        .route("/reservations/batch", post(rest::batch_handler))
        .route("/session/restart", post(rest::restart_session_handler))
        .layer(axum_middleware::from_fn(require_rpa_headers));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .layer(cors_layer(&state.config.cors_allowed_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Merge the API router with the Swagger UI router for a complete application.
    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static(middleware::LOGIN_ID_HEADER),
            HeaderName::from_static(middleware::LOGIN_PASSWORD_HEADER),
            HeaderName::from_static(middleware::SHOP_ID_HEADER),
            HeaderName::from_static(middleware::TEST_MODE_HEADER),
        ]);
    match origin.parse::<HeaderValue>() {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            warn!(%origin, error = %e, "Invalid CORS origin; cross-origin requests are disabled.");
            layer
        }
    }
}
