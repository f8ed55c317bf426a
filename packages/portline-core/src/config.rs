//! # Configuration
//!
//! Runtime settings for the pipeline. Every field has a default, so a
//! host can deserialize a partial JSON document and get sensible values
//! for everything it leaves out.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Field                      Default        Used by                      │
//! │  ──────────────────────────────────────────────────────────────────     │
//! │  database_path              None (memory)  storage::Database::open      │
//! │  media_dir                  "media"        HttpMediaClient, reconciler  │
//! │  link_preview_timeout_ms    2000           LinkEnricher                 │
//! │  link_preview_mode          awaited        ReceivePipeline              │
//! │  reconcile_interval_secs    30             Reconciler::spawn            │
//! │  latest_messages_limit      50             get_latest_messages callers  │
//! │  media_upload_endpoint      None           HttpMediaClient              │
//! │  user_agent                 portline/x.y.z HTTP clients                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// How link-preview enrichment runs relative to the receive call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkPreviewMode {
    /// The receive call waits for enrichment to finish (bounded by the timeout)
    #[default]
    Awaited,
    /// Enrichment runs on a spawned task and the receive call returns early
    Detached,
}

/// Configuration for Portline Core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// SQLite file path (in-memory database if None)
    pub database_path: Option<String>,
    /// Root of the per-chat media directories
    pub media_dir: PathBuf,
    /// Deadline for the Open Graph fetch of a received link
    pub link_preview_timeout_ms: u64,
    /// Whether receive waits for link enrichment
    pub link_preview_mode: LinkPreviewMode,
    /// Period of the background reconciler
    pub reconcile_interval_secs: u64,
    /// Default page size when loading a chat
    pub latest_messages_limit: usize,
    /// Endpoint that hands out media upload URLs
    pub media_upload_endpoint: Option<String>,
    /// User agent for outgoing HTTP requests
    pub user_agent: String,
    /// Enable verbose logging
    pub verbose_logging: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            media_dir: PathBuf::from("media"),
            link_preview_timeout_ms: 2000,
            link_preview_mode: LinkPreviewMode::Awaited,
            reconcile_interval_secs: 30,
            latest_messages_limit: 50,
            media_upload_endpoint: None,
            user_agent: format!("portline/{}", env!("CARGO_PKG_VERSION")),
            verbose_logging: false,
        }
    }
}

impl CoreConfig {
    /// Parse a configuration from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::DeserializationError(format!("Invalid config: {}", e)))
    }

    /// Link-preview deadline as a `Duration`
    pub fn link_preview_timeout(&self) -> Duration {
        Duration::from_millis(self.link_preview_timeout_ms)
    }

    /// Reconciler period as a `Duration` (at least one second)
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    /// Log filter directive matching `verbose_logging`
    pub fn log_filter(&self) -> &'static str {
        if self.verbose_logging || cfg!(feature = "verbose-logging") {
            "portline_core=debug"
        } else {
            "portline_core=info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.link_preview_timeout_ms, 2000);
        assert_eq!(config.latest_messages_limit, 50);
        assert_eq!(config.link_preview_mode, LinkPreviewMode::Awaited);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CoreConfig::from_json(
            r#"{"link_preview_mode": "detached", "media_dir": "/tmp/m"}"#,
        )
        .unwrap();
        assert_eq!(config.link_preview_mode, LinkPreviewMode::Detached);
        assert_eq!(config.media_dir, PathBuf::from("/tmp/m"));
        assert_eq!(config.link_preview_timeout_ms, 2000);
    }

    #[test]
    fn test_invalid_json() {
        let err = CoreConfig::from_json("{").unwrap_err();
        assert_eq!(err.code(), 903);
    }

    #[test]
    fn test_reconcile_interval_floor() {
        let config = CoreConfig {
            reconcile_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.reconcile_interval(), Duration::from_secs(1));
    }
}
