use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod catalog;
mod router;

use appointment_cell::{
    AppState, AppointmentBookingService, AttendanceTracker, InMemoryAppointmentStore, InMemoryAttendanceStore,
    LoggingNotifier, PublicBookingService,
};
use idempotency_cell::{IdempotencyLedger, RedisIdempotencyStore};
use shared_config::AppConfig;

const PURGE_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Amae scheduling API server");

    // Load configuration
    let config = AppConfig::from_env();

    // Idempotency ledger
    let ledger = match &config.redis_url {
        Some(url) => {
            let store = RedisIdempotencyStore::new(url)
                .await
                .context("failed to connect to the idempotency redis")?;
            info!("Idempotency records stored in redis");
            IdempotencyLedger::new(Arc::new(store), config.idempotency_ttl())
        }
        None => IdempotencyLedger::in_memory(config.idempotency_ttl()),
    };
    spawn_ledger_purge(ledger.clone());

    // Collaborators
    let directory = Arc::new(catalog::load_directory(config.catalog_path.as_deref()).await?);
    let attendance = Arc::new(AttendanceTracker::new(
        Arc::new(InMemoryAttendanceStore::new()),
        config.late_cancel_window(),
    ));

    let booking = Arc::new(AppointmentBookingService::new(
        directory,
        Arc::new(InMemoryAppointmentStore::new()),
        attendance,
        Arc::new(LoggingNotifier),
    ));
    let public_booking = Arc::new(PublicBookingService::new(booking.clone(), ledger));

    let state = AppState { booking, public_booking };

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    info!("Listening on {}", config.bind_address);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn spawn_ledger_purge(ledger: IdempotencyLedger) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = ledger.purge_expired(chrono::Utc::now()).await {
                warn!("Idempotency purge failed: {}", e);
            }
        }
    });
}
