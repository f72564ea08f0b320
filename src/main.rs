// Weather Rank API v0.1
use axum::{
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod db;
mod errors;
mod helpers;
mod routes;
mod services;

use config::AppConfig;
use services::fetch::{FetchClient, FileCache};
use services::predict::VendorMeanBlend;
use services::vendors::{OpenMeteo, VendorForecast};

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 5;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 2;
/// Seconds between ingest + inference cycles.
const INGEST_INTERVAL_SECS: u64 = 3600;

/// Weather Rank API — OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Weather Rank API",
        version = "0.1.0",
        description = "Ingests numeric forecasts from independent weather vendors, \
            reconciles them against ground observations, blends them into a local \
            forecast, and ranks every source by predictive accuracy per variable \
            and forecast horizon.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Metrics", description = "Per-source accuracy and leaderboard"),
        (name = "Predictions", description = "Blended forecast retrieval"),
    ),
    paths(
        routes::health::health_check,
        routes::metrics::get_sources,
        routes::metrics::get_leaderboard,
        routes::predict::post_predict,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::metrics::SourcesResponse,
            routes::metrics::LeaderboardResponse,
            routes::predict::PredictRequest,
            routes::predict::PredictionRow,
            routes::predict::PredictResponse,
            services::leaderboard::SourceScore,
            services::leaderboard::LeaderboardRow,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weather_rank_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    // Set up database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(DB_POOL_MAX_CONNECTIONS)
        .min_connections(DB_POOL_MIN_CONNECTIONS)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations completed");

    // Seed configured target locations
    match db::queries::seed_locations(&pool, &config.target_locations).await {
        Ok(()) => {
            if config.target_locations.is_empty() {
                tracing::warn!("TARGET_LOCATIONS is empty — ingestion will have nothing to fetch");
            } else {
                tracing::info!("Seeded {} target locations", config.target_locations.len());
            }
        }
        Err(e) => tracing::error!("Failed to seed locations: {}", e),
    }

    // Fetch client with file-backed HTTP cache
    let cache = Arc::new(FileCache::new(&config.http_cache_dir));
    let fetch_client = FetchClient::new(cache, config.fetch_config());

    // Vendor adapters. Open-Meteo is key-free and always on; further vendors
    // implement VendorForecast and get pushed here.
    let vendors: Vec<Arc<dyn VendorForecast>> =
        vec![Arc::new(OpenMeteo::new(&config.vendor_user_agent))];

    // Spawn the hourly ingest + inference loop
    let ingest_job = services::ingest::IngestJob {
        pool: pool.clone(),
        fetch: fetch_client,
        vendors,
        locations: config.target_locations.clone(),
        predictor: Arc::new(VendorMeanBlend),
        variables: config.variables.clone(),
        horizons: config.horizons_hours.clone(),
        vendor_sources: config.vendor_sources.clone(),
        concurrency: config.requests_concurrency,
        interval: std::time::Duration::from_secs(INGEST_INTERVAL_SECS),
    };
    tokio::spawn(ingest_job.run());

    // CORS — read endpoints plus the POST /predict body
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/sources", get(routes::metrics::get_sources))
        .route("/api/v1/leaderboard", get(routes::metrics::get_leaderboard))
        .route("/api/v1/predict", post(routes::predict::post_predict))
        .with_state(pool)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
