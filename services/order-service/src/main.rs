// =============================================================================
// ORDER SERVICE - Main Entry Point
// =============================================================================
// WHAT THIS SERVICE DOES:
// - Places orders, decrementing stock and snapshotting prices
// - Cancels and refunds orders, returning their quantities to stock
// - Tracks fulfillment status and emails the owner on arrival
// - Lets couriers pick up open orders; admins approve couriers
// - Sends the newsletter to subscribed users
// - Exposes Prometheus metrics
// =============================================================================

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use order_service::config::{Config, MailTransport};
use order_service::db::Database;
use order_service::metrics::setup_metrics;
use order_service::notify::{LogMailer, Mailer, Notifier, SesMailer};
use order_service::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -------------------------------------------------------------------------
    // STEP 1: Load environment variables
    // -------------------------------------------------------------------------
    dotenvy::dotenv().ok();

    // -------------------------------------------------------------------------
    // STEP 2: Initialize logging/tracing
    // -------------------------------------------------------------------------
    // RUST_LOG controls log levels, e.g. RUST_LOG=info,order_service=debug
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,order_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Order Service...");

    // -------------------------------------------------------------------------
    // STEP 3: Load configuration
    // -------------------------------------------------------------------------
    let config = Config::from_env()?;
    info!(
        port = config.port,
        mail_transport = ?config.mail_transport,
        "Configuration loaded"
    );

    // -------------------------------------------------------------------------
    // STEP 4: Set up Prometheus metrics
    // -------------------------------------------------------------------------
    let metrics_handle = setup_metrics()?;
    info!("Prometheus metrics initialized");

    // -------------------------------------------------------------------------
    // STEP 5: Connect to PostgreSQL database
    // -------------------------------------------------------------------------
    let db = Database::connect(&config.database_url).await?;
    info!("Connected to PostgreSQL");

    db.run_migrations().await?;
    info!("Database migrations completed");

    // -------------------------------------------------------------------------
    // STEP 6: Mail transport
    // -------------------------------------------------------------------------
    let mailer: Arc<dyn Mailer> = match config.mail_transport {
        MailTransport::Ses => Arc::new(SesMailer::from_env(config.ses_region.clone()).await),
        MailTransport::Log => Arc::new(LogMailer),
    };
    let notifier = Notifier::new(mailer, config.mail_from.clone(), config.notify_timeout);

    // -------------------------------------------------------------------------
    // STEP 7: Create application state
    // -------------------------------------------------------------------------
    let state = Arc::new(AppState::new(
        Arc::new(db),
        notifier,
        config.newsletter_concurrency,
        config.jwt_secret.clone(),
        metrics_handle,
    ));

    let app = order_service::app(state);

    // -------------------------------------------------------------------------
    // STEP 8: Start the HTTP server
    // -------------------------------------------------------------------------
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(address = %addr, "Order Service is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
