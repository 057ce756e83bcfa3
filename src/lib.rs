//! Content-addressed HTTP storage server.
//!
//! Buffers are byte blobs identified by the hex digest of their content under
//! a configurable hash algorithm (SHA3-256 by default). The server maps each
//! digest to a file named by the digest, serves verified reads, ingests
//! streaming uploads atomically, answers batched existence queries, and
//! coordinates with external writers through advisory lockfiles.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

pub mod checksum;
pub mod config;
pub mod inactivity;
pub mod inflight;
pub mod layout;
pub mod lock;
pub mod promise;
pub mod server;
pub mod status;
pub mod store;

use crate::config::Config;
use crate::inactivity::InactivityTracker;
use crate::layout::ExtraDir;
use crate::server::AppState;
use crate::server::create_router;
use crate::status::StatusTracker;
use crate::store::Store;

/// Entry point for the `hashserver` binary.
pub async fn hashserver_main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Loads configuration and shepherds startup through the status-file
/// handshake: any failure between the handshake and `running` marks the
/// status file `failed`.
async fn run() -> anyhow::Result<()> {
    let config = Config::load()?;

    let mut tracker = match &config.status_file {
        Some(path) => Some(StatusTracker::wait(path).await?),
        None => None,
    };

    let outcome = launch(&config, tracker.as_mut()).await;
    if outcome.is_err() {
        if let Some(tracker) = tracker.as_mut() {
            if !tracker.running_written() {
                if let Err(status_err) = tracker.write_failed() {
                    tracing::error!("failed to mark status file failed: {status_err:#}");
                }
            }
        }
    }
    outcome
}

/// Validates the configuration, binds the listener, completes the status
/// handshake, and serves until interrupted or idle past the timeout.
async fn launch(config: &Config, tracker: Option<&mut StatusTracker>) -> anyhow::Result<()> {
    config.validate()?;

    let mut extra_dirs = Vec::with_capacity(config.extra_dirs.len());
    for dir in &config.extra_dirs {
        extra_dirs.push(ExtraDir::discover(dir.clone()).await);
    }

    let store = Arc::new(Store::new(
        config.directory.clone(),
        config.layout,
        extra_dirs,
        config.lock_timeout(),
        config.encoding,
    ));
    let state = AppState::new(store);
    let inactivity = Arc::clone(&state.inactivity);
    let app = create_router(state, config.writable);

    let port = config.select_port()?;
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, port))?;
    let addr = listener.local_addr()?;

    if let Some(tracker) = tracker {
        tracker.write_running(addr.port())?;
    }
    println!("OK");
    info!("server listening on `{addr}`");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.inactivity_timeout(), inactivity))
        .await?;
    Ok(())
}

/// Resolves on an interrupt or once the server has been idle long enough.
async fn shutdown_signal(timeout: Option<Duration>, inactivity: Arc<InactivityTracker>) {
    let idle = async {
        match timeout {
            Some(timeout) => inactivity.monitor(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
        }
        () = idle => {
            info!("inactivity timeout reached, shutting down");
        }
    }
}
