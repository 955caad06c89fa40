//! # Server Configuration
//!
//! This module contains the server setup and configuration for the Pricehound
//! API: shared state assembly, the router, and the serve loop with its
//! background job driver.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{AppConfig, ConfigError};
use crate::driver::JobDriver;
use crate::handlers;
use crate::joblog::JobLog;
use crate::jobs::{ReportPublisher, StepEngine};
use crate::repositories::ReportJobRepository;
use crate::scrape::{ScrapeConfig, Scraper};
use crate::storage::ArtifactStore;
use crate::telemetry::{self, TraceContext};

/// Largest accepted request body; room for a generous input workbook.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: AppConfig,
    pub engine: StepEngine,
    pub joblog: JobLog,
}

/// Assemble the application state from validated configuration.
pub fn build_app_state(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<AppState, ConfigError> {
    let scraper = Arc::new(Scraper::new(Arc::new(site_scrape_config(&config)?)));

    let public_base = url::Url::parse(&config.storage.public_base_url).map_err(|_| {
        ConfigError::InvalidStoragePublicBase {
            value: config.storage.public_base_url.clone(),
        }
    })?;
    let store = ArtifactStore::new(config.storage.root.clone(), public_base);

    let joblog = JobLog::new(config.job_log_dir.clone());
    let engine = StepEngine::new(
        ReportJobRepository::new(db.clone()),
        scraper,
        ReportPublisher::new(store),
        joblog.clone(),
        Duration::from_secs(config.jobs.row_timeout_seconds),
    );

    Ok(AppState {
        db,
        config,
        engine,
        joblog,
    })
}

fn site_scrape_config(config: &AppConfig) -> Result<ScrapeConfig, ConfigError> {
    let base_url = url::Url::parse(&config.site.base_url).map_err(|_| {
        ConfigError::InvalidSiteBaseUrl {
            value: config.site.base_url.clone(),
        }
    })?;

    Ok(ScrapeConfig {
        base_url,
        login_path: config.site.login_path.clone(),
        stats_path: config.site.stats_path.clone(),
        username: config.site.username.clone().unwrap_or_default(),
        password: config.site.password.clone().unwrap_or_default(),
        user_agent: config.site.user_agent.clone(),
        session_file: config.site.session_file.clone(),
        session_ttl: Duration::from_secs(config.site.session_ttl_hours * 3600),
        nav_timeout: Duration::from_millis(config.site.nav_timeout_ms),
    })
}

/// Test-support state constructor.
pub fn create_test_app_state(config: AppConfig, db: DatabaseConnection) -> AppState {
    build_app_state(config, db).expect("test configuration must be valid")
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route(
            "/reports",
            post(handlers::reports::create_report).get(handlers::reports::list_reports),
        )
        .route("/reports/{id}", get(handlers::reports::get_report))
        .route("/reports/{id}/step", post(handlers::reports::step_report))
        .route("/reports/{id}/stop", post(handlers::reports::stop_report))
        .route(
            "/reports/{id}/finalize",
            post(handlers::reports::finalize_report),
        )
        .route("/reports/{id}/stream", get(handlers::reports::stream_report))
        .layer(middleware::from_fn(with_request_trace))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Attach a trace context to every request, honoring a caller-provided
/// `x-request-id` so client and server logs correlate.
async fn with_request_trace(request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("req-{}", &uuid::Uuid::new_v4().to_string()[..8]));

    telemetry::with_trace_context(TraceContext::new(trace_id), next.run(request)).await
}

/// Starts the server with the given configuration
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = build_app_state(config.clone(), db)?;
    let app = create_app(state.clone());

    let shutdown = CancellationToken::new();
    let driver_handle = if config.driver.enabled {
        let driver = JobDriver::new(
            state.engine.clone(),
            ReportJobRepository::new(state.db.clone()),
            config.driver.clone(),
        );
        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(err) = driver.run(token).await {
                tracing::error!("Job driver stopped with error: {:?}", err);
            }
        }))
    } else {
        None
    };

    // Resolve the configured bind address
    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(handle) = driver_handle {
        let _ = handle.await;
    }

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = shutdown.cancelled() => {},
    }
    shutdown.cancel();
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::reports::create_report,
        crate::handlers::reports::list_reports,
        crate::handlers::reports::get_report,
        crate::handlers::reports::step_report,
        crate::handlers::reports::stop_report,
        crate::handlers::reports::finalize_report,
        crate::handlers::reports::stream_report,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::handlers::reports::ReportJobInfo,
            crate::handlers::reports::ReportJobDetail,
            crate::handlers::reports::ReportsResponse,
            crate::handlers::reports::ReportStatusParam,
            crate::jobs::types::RowResult,
            crate::error::ApiError,
        )
    ),
    info(
        title = "Pricehound API",
        description = "Competitor price reports built from an authenticated pricing-site session",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
