//! CMAF live-ingest receiver.
//!
//! Accepts a live DASH encoder's chunked, fragmented-MP4 PUT uploads, parses
//! their structure on the fly via `cmaf_ingest_core`, persists segments to
//! disk, and serves the derived DASH manifests back out over HTTP.

mod channel_manager;
mod config;
mod config_file;
mod error;
mod http;
mod metrics;
mod state;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

use crate::channel_manager::ChannelManager;
use crate::config::{LogFormat, ServerConfig};
use crate::metrics::Metrics;
use crate::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "cmaf-ingest-server";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match ServerConfig::from_args(args) {
        Ok(None) => {
            println!("{APP_NAME} v{VERSION}");
            return ExitCode::SUCCESS;
        }
        Ok(Some(config)) => config,
        Err(err) => {
            eprintln!("{APP_NAME}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("{APP_NAME}: failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{APP_NAME}: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServerConfig) -> crate::error::Result<()> {
    let log_filter_handle = init_logging(&config);

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    tracing::info!(?config, "configuration loaded");

    std::fs::create_dir_all(&config.storage_root)
        .map_err(|e| crate::error::ServerError::Config(format!("cannot create storage root: {e}")))?;

    let (default_user, default_password, channel_configs) = match &config.config_path {
        Some(path) => {
            let file = crate::config_file::ChannelsConfigFile::from_file(path)
                .map_err(|e| crate::error::ServerError::Config(format!("{}: {e}", path.display())))?;
            let default_user = file.default_user.clone();
            let default_password = file.default_password.clone();
            (default_user, default_password, file.into_channel_configs())
        }
        None => (None, None, Vec::new()),
    };

    let channels = Arc::new(ChannelManager::new(
        config.storage_root.clone(),
        default_user,
        default_password,
        config.default_timeshift_buffer_depth_secs,
        channel_configs,
    ));
    let metrics = Arc::new(Metrics::new());
    let state = Arc::new(AppState::new(config.clone(), channels, metrics, log_filter_handle));

    let app = crate::http::create_router(state.clone());

    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| crate::error::ServerError::Config(format!("invalid bind address: {e}")))?;
    tracing::info!(%addr, prefix = %config.url_prefix, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    // Channels (and their consumer tasks) live until process exit by design
    // (spec §3 "Channel" lifecycle) — they are never removed from the
    // manager's map, so `ChannelManager::wait_all` would never observe every
    // consumer's inbound sender dropping. It exists for tests that construct
    // and tear down a `ChannelManager` directly; an orderly process exit
    // here just lets the runtime tear the still-running consumer tasks down.
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received shutdown signal");
    state.shutdown();
}

/// Initialize `tracing` with a reloadable `EnvFilter` (spec §9: the logger
/// is process-wide with a dynamic level, surfaced over `GET`/`POST
/// /loglevel`), choosing between the compact and JSON formatters per
/// `--logformat`.
fn init_logging(
    config: &ServerConfig,
) -> Option<reload::Handle<EnvFilter, tracing_subscriber::Registry>> {
    let default_directive = format!("cmaf_ingest_server={0},cmaf_ingest_core={0}", config.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let (filter, handle) = reload::Layer::new(filter);

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    Some(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
