//! Pickup Verification & Settlement API Server

mod actor;
mod db;
mod error;
mod models;
mod routes;
mod settlement;
mod storage;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pv_core::store::NoopSettlementNotifier;
use pv_core::{EngineConfig, SettlementNotifier, VerificationEngine};

/// Application state shared across handlers
pub struct AppState {
    pub engine: VerificationEngine,
    pub config: AppConfig,
}

/// Application configuration
#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub upload_dir: String,
    pub bind_addr: String,
    pub settlement_url: Option<String>,
    pub pickup_radius_m: f64,
    pub enforce_pickup_radius: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/pickup_verification".to_string()),
            upload_dir: std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "./data/photos".to_string()),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            settlement_url: std::env::var("SETTLEMENT_URL").ok(),
            pickup_radius_m: std::env::var("PICKUP_RADIUS_M")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500.0),
            enforce_pickup_radius: std::env::var("ENFORCE_PICKUP_RADIUS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "pv_api=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Pickup Verification API Server");

    let config = AppConfig::default();

    std::fs::create_dir_all(&config.upload_dir).expect("Failed to create photo directory");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    info!("Connected to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    info!("Database migrations complete");

    let store = Arc::new(db::PgStore::new(pool));
    let photos = Arc::new(storage::DiskPhotoStore::new(&config.upload_dir));
    let notifier: Arc<dyn SettlementNotifier> = match &config.settlement_url {
        Some(url) => Arc::new(settlement::HttpSettlementNotifier::new(url.clone())),
        None => Arc::new(NoopSettlementNotifier),
    };

    let engine_config = EngineConfig {
        pickup_radius_m: config.pickup_radius_m,
        enforce_pickup_radius: config.enforce_pickup_radius,
        ..EngineConfig::default()
    };
    let engine = VerificationEngine::with_config(
        store,
        photos,
        notifier,
        pv_core::PolicyTable::default(),
        engine_config,
    );

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState { engine, config });

    let app = Router::new()
        // Health check
        .route("/health", get(routes::health_check))
        // Shipment lifecycle
        .route(
            "/api/shipments/:id/en-route",
            post(routes::shipments::mark_en_route),
        )
        .route(
            "/api/shipments/:id/arrived",
            post(routes::shipments::mark_arrived),
        )
        .route(
            "/api/shipments/:id/cancel",
            post(routes::shipments::cancel_at_pickup),
        )
        // Verification sessions
        .route(
            "/api/shipments/:id/verification",
            post(routes::verifications::start_verification)
                .get(routes::verifications::get_verification),
        )
        .route(
            "/api/verifications/:id/photos",
            post(routes::verifications::attach_photo),
        )
        .route(
            "/api/verifications/:id/decision",
            post(routes::verifications::submit_decision),
        )
        .route(
            "/api/verifications/:id/response",
            post(routes::verifications::client_respond),
        )
        // Settlement webhook
        .route(
            "/api/cancellations/:id/refund-status",
            post(routes::cancellations::report_refund_status),
        )
        // CORS
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        // Tracing
        .layer(TraceLayer::new_for_http())
        // State
        .with_state(state);

    info!("Listening on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind");
    axum::serve(listener, app).await.expect("Server error");
}
