//! pqfetch server
//!
//! Loads configuration, opens the database pool, starts the dispatcher and
//! notification listener and serves the HTTP pass-through endpoints.

use std::sync::Arc;

use anyhow::Context;
use pqfetch_dispatch::{Dispatcher, NotificationListener, PgStore};
use pqfetch_http::HttpTransport;
use pqfetch_server::build_router;
use pqfetch_server::state::AppState;
use tokio::net::TcpListener;
use tokio::sync::watch;

mod cli;
mod config_helpers;
mod tracing_setup;

use cli::CliArgs;
use config_helpers::{
    database_config_from_config, dispatcher_config, listener_config, load_validated_config,
    parse_bind_address,
};
use tracing_setup::install_tracing_from_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    if args.help_requested {
        CliArgs::print_help();
        return Ok(());
    }

    // CLI takes precedence over the environment
    let config_path = args
        .config_path
        .or_else(|| std::env::var("PQFETCH_CONFIG_PATH").ok());

    let config = load_validated_config(config_path.as_deref())?;

    install_tracing_from_config(&config.logging);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = config_path.as_deref().unwrap_or("-"),
        "pqfetch starting"
    );

    let db_cfg = database_config_from_config(&config)?;
    let pool = pqfetch_db_connection::create_pool(&db_cfg).await?;
    let store = Arc::new(PgStore::new(pool.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::new();

    let (dispatcher, listener_status) = if config.fetch.enable {
        let transport = Arc::new(HttpTransport::new(&config.http_client)?);
        let (dispatcher, handle) =
            Dispatcher::new(dispatcher_config(&config.fetch), transport, Arc::clone(&store));
        workers.push(tokio::spawn(dispatcher.run()));

        let (listener, status) =
            NotificationListener::new(pool.clone(), listener_config(&config.fetch), handle.clone());
        workers.push(tokio::spawn(listener.run(shutdown_rx)));

        (Some(handle), Some(status))
    } else {
        tracing::info!("fetch disabled, notification listener not started");
        (None, None)
    };

    let state = Arc::new(AppState::new(store, dispatcher.clone(), listener_status));
    let app = build_router(state);

    let addr = parse_bind_address(&config.server.host, config.server.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown requested");
            let _ = shutdown_tx.send(true);
            if let Some(dispatcher) = dispatcher {
                let _ = dispatcher.shutdown();
            }
        })
        .await?;

    // dispatcher drains in-flight jobs before its task ends
    for worker in workers {
        if let Err(err) = worker.await {
            tracing::error!(error = %err, "background task failed");
        }
    }
    pool.close().await;
    tracing::info!("pqfetch stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
