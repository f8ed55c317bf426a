//! # Portline Core
//!
//! The message pipeline of the Portline P2P messenger: what happens to a
//! message between the user pressing send and the encrypted transport, and
//! between the transport handing over a decrypted payload and the chat
//! list updating.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        PORTLINE CORE MODULES                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌────────────┐  │
//! │  │    Send      │  │   Receive    │  │ Link Preview │  │ Reconciler │  │
//! │  │              │  │              │  │              │  │            │  │
//! │  │ - Journal    │  │ - Classify   │  │ - Open Graph │  │ - Backlog  │  │
//! │  │ - Transmit   │  │ - Apply      │  │ - Timeout    │  │ - Expiry   │  │
//! │  │ - Retry      │  │ - Summary    │  │ - Image      │  │ - Interval │  │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘  └─────┬──────┘  │
//! │         │                 │                 │                │         │
//! │         └─────────────────┴────────┬────────┴────────────────┘         │
//! │                                    │                                    │
//! │  ┌──────────────────┐   ┌──────────▼──────────┐   ┌──────────────────┐ │
//! │  │    Transport     │   │      Storage        │   │   MediaClient    │ │
//! │  │   (host-owned)   │   │                     │   │                  │ │
//! │  │ - Encrypt        │   │ - Messages          │   │ - Upload URL     │ │
//! │  │ - Deliver        │   │ - Permissions       │   │ - Upload         │ │
//! │  │                  │   │ - Media, Summaries  │   │ - Download       │ │
//! │  └──────────────────┘   └─────────────────────┘   └──────────────────┘ │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - Runtime configuration
//! - [`storage`] - SQLite message, permissions, media and summary store
//! - [`messaging`] - Content types, send dispatcher, receive pipeline
//! - [`reconciler`] - Retry backlog and disappearing-message expiry
//! - [`logging`] - `tracing` subscriber setup

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod reconciler;
pub mod storage;
/// ISO-8601 UTC time helpers.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::{CoreConfig, LinkPreviewMode};
pub use error::{Error, Result};
pub use messaging::{
    ContentType, MediaClient, MessageData, MessageStatus, OpenGraphFetcher, ReceivePipeline,
    SendDispatcher, Transport,
};
pub use reconciler::{ReconcileReport, Reconciler, ReconcilerHandle};
pub use storage::Database;

// ============================================================================
// CORE INSTANCE
// ============================================================================

use std::sync::Arc;

use messaging::{HttpMediaClient, HttpOpenGraphFetcher, LinkEnricher};
use storage::StorageConfig;

/// A wired-up pipeline: store, dispatcher, receive pipeline and reconciler
///
/// ## Lifecycle
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                       PORTLINE CORE LIFECYCLE                           │
/// ├─────────────────────────────────────────────────────────────────────────┤
/// │                                                                         │
/// │  1. Open                                                                │
/// │     ┌─────────────┐                                                    │
/// │     │ PortlineCore│──► Open SQLite, run migrations                     │
/// │     │ ::new()     │──► Build dispatcher + receive pipeline             │
/// │     └─────────────┘                                                    │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  2. Start background work                                              │
/// │     ┌─────────────┐                                                    │
/// │     │ start_      │──► Retry backlog now, then every interval          │
/// │     │ reconciler()│──► Purge expired messages                          │
/// │     └─────────────┘                                                    │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  3. Active                                                             │
/// │     ┌─────────────┐                                                    │
/// │     │ dispatcher  │◄─► send_direct / retry_direct                      │
/// │     │ receiver    │◄─► on_message_received                             │
/// │     └─────────────┘                                                    │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  4. Shutdown                                                           │
/// │     ┌─────────────┐                                                    │
/// │     │ handle.     │──► Stop the reconcile loop                         │
/// │     │ shutdown()  │                                                    │
/// │     └─────────────┘                                                    │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
pub struct PortlineCore {
    config: CoreConfig,
    db: Arc<Database>,
    dispatcher: Arc<SendDispatcher>,
    receiver: Arc<ReceivePipeline>,
    reconciler: Arc<Reconciler>,
}

impl PortlineCore {
    /// Wire the pipeline around a host transport
    ///
    /// ## Example
    ///
    /// ```ignore
    /// use portline_core::{CoreConfig, PortlineCore};
    ///
    /// let core = PortlineCore::with_http(CoreConfig::default(), transport).await?;
    /// core.dispatcher().send_direct("chat", ContentType::Text, data, None, None).await;
    /// ```
    pub async fn new(
        config: CoreConfig,
        transport: Arc<dyn Transport>,
        media: Arc<dyn MediaClient>,
        fetcher: Arc<dyn OpenGraphFetcher>,
    ) -> Result<Self> {
        tracing::info!("Starting Portline Core v{}", env!("CARGO_PKG_VERSION"));

        let db = Arc::new(
            storage::init(StorageConfig {
                database_path: config.database_path.clone(),
            })
            .await?,
        );
        let dispatcher = Arc::new(SendDispatcher::new(db.clone(), transport, media.clone()));

        let enricher = Arc::new(LinkEnricher::new(
            db.clone(),
            fetcher,
            media.clone(),
            config.link_preview_timeout(),
        ));
        let receiver = Arc::new(ReceivePipeline::new(
            db.clone(),
            media,
            enricher,
            config.media_dir.clone(),
            config.link_preview_mode,
        ));
        let reconciler = Arc::new(Reconciler::new(dispatcher.clone(), config.media_dir.clone()));

        Ok(Self {
            config,
            db,
            dispatcher,
            receiver,
            reconciler,
        })
    }

    /// Wire the pipeline with the reqwest-backed media client and preview fetcher
    pub async fn with_http(config: CoreConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let media = Arc::new(HttpMediaClient::new(&config)?);
        let fetcher = Arc::new(HttpOpenGraphFetcher::new(&config)?);
        Self::new(config, transport, media, fetcher).await
    }

    /// Active configuration
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The message store
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Outgoing entry points
    pub fn dispatcher(&self) -> &Arc<SendDispatcher> {
        &self.dispatcher
    }

    /// Incoming entry points
    pub fn receiver(&self) -> &Arc<ReceivePipeline> {
        &self.receiver
    }

    /// Backlog and expiry primitives
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Newest messages of a direct chat, up to `latest_messages_limit`
    pub fn latest_messages(&self, chat_id: &str) -> Result<Vec<storage::LoadedMessage>> {
        self.db
            .get_latest_messages(chat_id, self.config.latest_messages_limit)
    }

    /// Run the reconciler on the configured interval
    pub fn start_reconciler(&self) -> ReconcilerHandle {
        self.reconciler
            .clone()
            .spawn(self.config.reconcile_interval())
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Portline Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns build information for debugging
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        #[cfg(target_os = "ios")]
        target: "ios",
        #[cfg(target_os = "android")]
        target: "android",
        #[cfg(target_os = "macos")]
        target: "macos",
        #[cfg(target_os = "linux")]
        target: "linux",
        #[cfg(target_os = "windows")]
        target: "windows",
        #[cfg(not(any(
            target_os = "ios",
            target_os = "android",
            target_os = "macos",
            target_os = "linux",
            target_os = "windows"
        )))]
        target: "unknown",
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
    }
}

/// Build information for debugging
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Crate version
    pub version: &'static str,
    /// Target OS
    pub target: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
}

// ============================================================================
// TESTS
// ============================================================================
