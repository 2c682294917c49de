use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use domain::services::{
    ChartSource, DataCache, ExportStore, FetchCoordinator, PreferenceStore, SharedClock,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{
    metrics_handler, metrics_middleware, rate_limit_middleware, security_headers_middleware,
    trace_id, RateLimiterState, SecurityHeaders,
};
use crate::routes::{cache, charts, downloads, exports, filters, health};
use crate::services::{ChartExportWriter, ExportLedger, FilterSessions, LedgerConfig};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub coordinator: FetchCoordinator,
    pub ledger: Arc<ExportLedger>,
    pub exports: ChartExportWriter,
    pub filters: Arc<FilterSessions>,
    pub rate_limiter: Option<Arc<RateLimiterState>>,
    pub clock: SharedClock,
    /// `None` when running on in-memory stores.
    pub pool: Option<PgPool>,
}

/// Storage and data source implementations the service runs on.
pub struct Backends {
    pub exports: Arc<dyn ExportStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub source: Arc<dyn ChartSource>,
    pub clock: SharedClock,
    pub pool: Option<PgPool>,
}

impl AppState {
    /// Wires the cache, coordinator, ledger and filter sessions together.
    pub fn new(config: Config, backends: Backends) -> Self {
        let Backends {
            exports,
            preferences,
            source,
            clock,
            pool,
        } = backends;

        let cache = Arc::new(DataCache::new(config.cache.cache_config(), clock.clone()));
        let coordinator =
            FetchCoordinator::new(source, cache, clock.clone(), config.cache.fetch_config());

        let ledger = Arc::new(ExportLedger::new(
            exports,
            clock.clone(),
            LedgerConfig {
                export_root: config.downloads.export_dir.clone(),
                retention: chrono::Duration::hours(config.downloads.retention_hours),
                max_downloads_per_user: config.downloads.max_downloads_per_user,
            },
        ));
        let writer = ChartExportWriter::new(coordinator.clone(), ledger.clone(), clock.clone());
        let filters = Arc::new(FilterSessions::new(
            preferences,
            clock.clone(),
            config.filters.clone(),
        ));
        let rate_limiter =
            RateLimiterState::new(config.downloads.rate_limit_per_minute).map(Arc::new);

        Self {
            config: Arc::new(config),
            coordinator,
            ledger,
            exports: writer,
            filters,
            rate_limiter,
            clock,
            pool,
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        // Development: allow any origin
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

pub fn create_app(state: AppState) -> Router {
    let config = state.config.clone();

    let chart_routes = Router::new()
        .route(
            "/api/v1/charts/:kind",
            get(charts::get_chart).post(charts::query_chart),
        )
        .route("/api/v1/cache", delete(cache::invalidate_all))
        .route("/api/v1/cache/stats", get(cache::cache_stats))
        .route("/api/v1/cache/:kind", delete(cache::invalidate_kind));

    let filter_routes = Router::new()
        .route(
            "/api/v1/filters",
            get(filters::get_filters)
                .patch(filters::update_filters)
                .delete(filters::delete_filters),
        )
        .route("/api/v1/filters/reset", post(filters::reset_filters))
        .route("/api/v1/filters/clear", post(filters::clear_filters))
        .route("/api/v1/filters/undo", post(filters::undo_filters))
        .route(
            "/api/v1/filters/presets",
            get(filters::list_presets).post(filters::save_preset),
        )
        .route(
            "/api/v1/filters/presets/:label/apply",
            post(filters::apply_preset),
        )
        .route(
            "/api/v1/filters/presets/:label",
            delete(filters::delete_preset),
        );

    let export_routes = Router::new()
        .route(
            "/api/v1/exports",
            get(exports::list_exports).post(exports::create_export),
        )
        .route("/api/v1/exports/bulk-delete", post(exports::bulk_delete))
        .route("/api/v1/exports/bulk-archive", post(exports::bulk_archive));

    // Token issuance is rate limited per user
    let download_link_routes = Router::new()
        .route(
            "/api/v1/exports/:id/download",
            post(exports::create_download),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    // Public routes (no caller identity required)
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/api/v1/downloads/:token", get(downloads::download))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(chart_routes)
        .merge(filter_routes)
        .merge(export_routes)
        .merge(download_link_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(middleware::from_fn_with_state(
            SecurityHeaders {
                hsts_enabled: config.security.hsts_enabled,
            },
            security_headers_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors_layer(&config.security.cors_origins))
        .with_state(state)
}
