//! REST API server module
//!
//! Provides an OpenAPI 3.1 compliant REST API for listing formats,
//! registering downloads, following their progress and streaming the result.

use crate::{Config, RemuxDownloader, Result};
use axum::{
    Router,
    http::{HeaderValue, header::CONTENT_DISPOSITION},
    middleware,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod auth;
pub mod catalog;
pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use auth::{ApiKeyValidator, Identity, SessionValidator};
pub use catalog::CatalogResolver;
pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// Authenticates with [`ApiKeyValidator`] and has no catalog attached; use
/// [`router_with_state`] to plug in other collaborators.
///
/// # Routes
///
/// ## Downloads
/// - `GET /formats?sourceUrl=` - List the formats of a remote page
/// - `POST /downloads` - Register a download
/// - `GET /downloads/:id/progress` - Live progress (SSE or NDJSON)
/// - `GET /downloads/:id/stream` - Download the muxed media
///
/// ## System
/// - `GET /health` - Health check (never authenticated)
/// - `GET /capabilities` - Tool paths and probed audio encoder
/// - `GET /events` - Progress of every download as server-sent events
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive Swagger UI documentation (if enabled)
pub fn create_router(downloader: Arc<RemuxDownloader>, config: Arc<Config>) -> Router {
    router_with_state(AppState::new(downloader, config))
}

/// Create the API router around a prepared [`AppState`]
pub fn router_with_state(state: AppState) -> Router {
    let config = state.config.clone();

    // Everything except health and the API description needs an identity
    let protected = Router::new()
        .route("/formats", get(routes::list_formats))
        .route("/downloads", post(routes::create_download))
        .route("/downloads/:id/progress", get(routes::download_progress))
        .route("/downloads/:id/stream", get(routes::download_stream))
        .route("/capabilities", get(routes::get_capabilities))
        .route("/events", get(routes::event_stream))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_identity,
        ));

    let router = Router::new()
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec))
        .merge(protected);

    // SwaggerUi reuses the /openapi.json endpoint defined above
    let router = if config.server.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.with_state(state).layer(TraceLayer::new_for_http());

    // Apply CORS middleware if enabled in config
    if config.server.api.cors_enabled {
        let cors = build_cors_layer(&config.server.api.cors_origins);
        router.layer(cors)
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` or an empty list allows any origin. `Content-Disposition` is
/// exposed so browser clients can read the attachment filename.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers([CONTENT_DISPOSITION])
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers([CONTENT_DISPOSITION])
    }
}

/// Start the API server on the configured bind address.
///
/// Runs until the server stops, either due to an error or because the task
/// is aborted.
///
/// # Example
///
/// ```no_run
/// use remux_dl::{RemuxDownloader, Config};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(Config::default());
/// let downloader = Arc::new(RemuxDownloader::new((*config).clone()).await?);
///
/// // Start API server (blocks until shutdown)
/// remux_dl::api::start_api_server(downloader, config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(downloader: Arc<RemuxDownloader>, config: Arc<Config>) -> Result<()> {
    serve(create_router(downloader, config.clone()), config.server.api.bind_address).await
}

/// Serve `router` on `bind_address`
///
/// Provides `ConnectInfo<SocketAddr>` so session validators see the client
/// address.
pub async fn serve(router: Router, bind_address: SocketAddr) -> Result<()> {
    tracing::info!(address = %bind_address, "Starting API server");

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(
        address = %listener.local_addr().unwrap_or(bind_address),
        "API server listening"
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, unix))]
mod tests;
