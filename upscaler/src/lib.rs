//! # upscaler: image upscaling service
//!
//! `upscaler` is the server side of a browser-based image upscaling tool. The browser uploads
//! a file through an external upload widget, then posts the resulting public URL to
//! `POST /api/upscale`. The service fetches the image, checks it is an image the model can
//! handle, asks a hosted Real-ESRGAN model on Replicate to upscale it 2x, and answers with the
//! URL of the upscaled image or a structured error.
//!
//! ## Architecture
//!
//! One request, one linear pipeline:
//!
//! 1. [`api::handlers::upscale`] parses the body and checks that a URL is present
//! 2. [`validation::ImageValidator`] fetches the image once and runs the pre-flight checks
//! 3. [`upscale::upscale_image`] races the [`provider::UpscaleProvider`] against a deadline
//! 4. [`errors::Error`] renders every failure as the same JSON envelope
//!
//! Nothing is persisted and there is no background work apart from provider calls that
//! outlived their deadline.
//!
//! ## Running
//!
//! ```bash
//! export REPLICATE_API_TOKEN=r8_...
//! upscaler -f config.yaml
//! ```
//!
//! See [`config`] for the available settings and [`telemetry`] for trace export.

pub mod api;
pub mod config;
pub mod errors;
mod openapi;
pub mod process;
pub mod provider;
pub mod telemetry;
pub mod upscale;
pub mod validation;

#[cfg(test)]
mod test;
#[cfg(test)]
mod test_utils;

use crate::config::CorsOrigin;
use crate::openapi::ApiDoc;
use crate::provider::{ReplicateProvider, UpscaleProvider};
use crate::validation::ImageValidator;
use anyhow::Context;
use axum::{
    Json, Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .validator(ImageValidator::new(client))
///     .provider(Arc::new(provider))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub validator: ImageValidator,
    pub provider: Arc<dyn UpscaleProvider>,
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    // A literal "*" in an origin list is rejected by tower-http, wildcard has its own variant
    let allow_origin = if config.cors.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                // Origins never carry a path; Url adds a trailing slash we don't want
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// - `POST /api/upscale`: the upscale endpoint
/// - `GET /api/openapi.json` and `/docs`: API documentation
/// - `GET /healthz`: liveness
///
/// Every response carries `Cache-Control: no-store`.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        .route("/upscale", post(api::handlers::upscale::upscale))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }));

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api", api_routes)
        .with_state(state.clone())
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;

    let router = router.layer(
        ServiceBuilder::new()
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_request(DefaultOnRequest::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(SetResponseHeaderLayer::overriding(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-store"),
            ))
            .layer(cors_layer),
    );

    Ok(router)
}

/// The HTTP server and everything it needs.
///
/// 1. **Create**: [`Application::new`] builds the HTTP clients, the Replicate provider and the router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: when the shutdown future resolves, in-flight requests finish and spans are flushed
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting upscaler with configuration: {:#?}", config);

        // Image fetches are bounded as a whole; provider calls are bounded by the deadline and poll ceiling
        let fetch_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.upscale.fetch_timeout)
            .build()
            .context("Failed to build image fetch client")?;
        let provider_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to build provider client")?;

        let provider = ReplicateProvider::new(provider_client, &config.replicate)?;

        let state = AppState::builder()
            .config(config.clone())
            .validator(ImageValidator::new(fetch_client))
            .provider(Arc::new(provider))
            .build();

        let router = build_router(&state)?;

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Upscaler listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
