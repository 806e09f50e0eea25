//! Application entry point for the `motortwin-gateway` service.
//!
//! This binary orchestrates the full startup sequence for the telemetry
//! acquisition gateway, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool
//! - Creating the database schema if it does not exist
//! - Spawning one acquisition loop per configured device
//! - Binding the Axum HTTP server for the read-only viewer routes
//! - Shutting down gracefully on SIGINT/SIGTERM, letting in-flight
//!   cycles finish before the process exits
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `GATEWAY_CONFIG` (optional) – TOML gateway file (default: `gateway.toml`)
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `POLL_RETRY_MAX` (optional) – poll attempts per cycle (default: 3)
//! - `POLL_RETRY_BACKOFF_MS` (optional) – linear backoff base (default: 250)
//! - `GATEWAY_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `GATEWAY_SPAN_EVENTS` (optional) – span event mode for tracing
use std::{env, io::IsTerminal, net::SocketAddr, sync::Arc};

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

mod acquisition;
mod alarm;
mod config;
mod error;
mod models;
mod routes;
mod schema;
mod sink;
mod source;
mod store;

use acquisition::{AcquisitionLoop, RetryPolicy};
use alarm::AlarmEvaluator;
use config::GatewayConfig;
use routes::QueryState;
use sink::TracingEventSink;
use source::ModbusRtuSource;
use store::PgSampleStore;

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let settings = config::load_from_env()?;
    settings.log_config();

    let gateway = Arc::new(GatewayConfig::load(&settings.gateway_config)?);
    tracing::info!(
        "Gateway config loaded: {} device(s)",
        gateway.devices.len()
    );

    tracing::info!("Attempting to connect to database: {}", settings.db_url);

    let pool = PgPoolOptions::new()
        .max_connections(settings.db_pool_max)
        .connect(&settings.db_url)
        .await
        .map_err(|e| {
            anyhow::anyhow!("Failed to connect to database '{}': {}", settings.db_url, e)
        })?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let store = Arc::new(PgSampleStore::new(pool));
    let alarms = Arc::new(AlarmEvaluator::new(&gateway));
    let event_sink = Arc::new(TracingEventSink);
    let retry = RetryPolicy {
        max_attempts: settings.poll_retry_max,
        backoff: settings.poll_retry_backoff,
    };

    // One independent loop per device; each owns its serial link
    // exclusively and stops between cycles when the watch flips.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut loop_handles = Vec::new();

    for device in gateway.devices.clone() {
        let source = ModbusRtuSource::open(&device.id, &device.port, device.baud_rate)?;
        let acquisition = AcquisitionLoop::new(
            device,
            source,
            store.clone(),
            alarms.clone(),
            event_sink.clone(),
            retry,
            shutdown_rx.clone(),
        );
        loop_handles.push(tokio::spawn(acquisition.run()));
    }

    let app: Router = routes::router(QueryState {
        store,
        alarms,
        gateway,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    let mut serve_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = serve_shutdown.changed().await;
        })
        .await?;

    // The HTTP side has drained; wait for every loop to finish its
    // in-flight cycle before the process exits.
    for handle in loop_handles {
        let _ = handle.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

// ---

/// Resolve once SIGINT (Ctrl-C) or SIGTERM (on Unix) arrives, so the
/// gateway shuts down cleanly whether stopped interactively or by a
/// process manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    // ---
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `GATEWAY_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `GATEWAY_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked. It installs the subscriber globally
/// for the lifetime of the process.
fn init_tracing() {
    // ---
    let span_events = match env::var("GATEWAY_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to GATEWAY_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("GATEWAY_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
