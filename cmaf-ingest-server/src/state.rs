//! Application state shared across all handlers.
//!
//! Replaces the teacher's VOD stream/segment-cache registry with the three
//! things an ingest handler actually needs: the channel manager, the
//! metrics counters, and a handle to change the tracing filter at runtime
//! (`/loglevel`, spec §6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing_subscriber::{reload, EnvFilter};

use crate::channel_manager::ChannelManager;
use crate::config::ServerConfig;
use crate::metrics::Metrics;

/// Application state shared across all handlers
pub struct AppState {
    pub config: ServerConfig,
    pub channels: Arc<ChannelManager>,
    pub metrics: Arc<Metrics>,
    pub log_filter_handle: Option<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
    shutdown: AtomicBool,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        channels: Arc<ChannelManager>,
        metrics: Arc<Metrics>,
        log_filter_handle: Option<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
    ) -> Self {
        Self {
            config,
            channels,
            metrics,
            log_filter_handle,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Check if shutdown is requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
