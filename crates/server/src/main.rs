use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use taskforge_engine::{TaskManager, UpdateHub};
use taskforge_server::cli::Cli;
use taskforge_server::config::AppConfig;
use taskforge_server::state::AppState;
use taskforge_server::{pump, routes, shutdown, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = AppConfig::load(cli.config.as_deref())?;
    cli.apply(&mut cfg);
    telemetry::init_tracing(&cfg.logger);

    let manager = Arc::new(
        TaskManager::new(cfg.worker.clone(), cfg.task.clone())
            .context("failed to build task manager")?,
    );
    let hub = UpdateHub::start();
    manager.start();

    let updates = manager
        .take_update_receiver()
        .context("update receiver already taken")?;
    let shutdown = CancellationToken::new();
    let pump_handle = tokio::spawn(pump::run(
        updates,
        hub.clone(),
        Arc::clone(&manager),
        shutdown.clone(),
    ));
    tokio::spawn(shutdown::watch_signals(shutdown.clone()));

    let state = AppState {
        manager: Arc::clone(&manager),
        hub,
    };
    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(address = %addr, "starting server");

    let graceful = shutdown.clone();
    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .await
        .context("server error")?;

    // serve() can also return without a signal; release the pump as well.
    shutdown.cancel();

    if let Err(err) = manager.stop().await {
        tracing::error!(error = %err, "task manager did not stop cleanly");
    }
    let _ = pump_handle.await;
    tracing::info!("shutdown complete");
    Ok(())
}
