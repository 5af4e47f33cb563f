use anyhow::Context;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use room_reservations::{
    app,
    config::{AppConfig, Config, LogFormat},
    services::ledger_audit::LedgerAuditService,
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn init_tracing(app: &AppConfig) {
    let filter = EnvFilter::try_new(&app.rust_log).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match app.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(&config.app);

    info!(
        environment = %config.app.environment,
        backend = ?config.store.backend,
        "Starting room reservation service"
    );

    let state = AppState::new(config.clone()).await?;

    // --- Ledger audit ---

    if config.reservation.verify_ledger_on_startup {
        LedgerAuditService::new(state.store.clone())
            .run_once()
            .await
            .context("startup ledger verification failed")?;
    }

    let audit = match config.reservation.ledger_audit_interval_seconds {
        0 => None,
        secs => Some(LedgerAuditService::new(state.store.clone()).spawn(Duration::from_secs(secs))),
    };

    // --- Web server ---

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port)
        .parse()
        .context("invalid HOST/PORT")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(audit) = audit {
        audit.abort();
    }
    state.shutdown().await;
    info!("Server stopped");
    Ok(())
}
