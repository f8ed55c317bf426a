//! # Media Client
//!
//! Moves attachment bytes between the local media directory and remote
//! storage.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  send    local file ──► request_upload_url ──► upload_raw_media (PUT)   │
//! │                                 │                                       │
//! │                                 └──► remoteUrl stored in message data   │
//! │                                                                         │
//! │  receive remoteUrl / og:image ──► download_to_media_dir (GET)           │
//! │                   └──► <media_dir>/<chatId>/<mediaId>-<fileName>        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};

use crate::config::CoreConfig;
use crate::error::{Error, Result};

/// Upload and download of media bytes
#[async_trait]
pub trait MediaClient: Send + Sync {
    /// Get a URL the bytes for a new attachment in `chat_id` can be uploaded to
    async fn request_upload_url(&self, chat_id: &str) -> Result<String>;

    /// Upload a local file (relative to the media dir) to `destination_url`
    async fn upload_raw_media(&self, local_path: &str, destination_url: &str) -> Result<()>;

    /// Download `source_url` into the chat's media directory
    ///
    /// Returns the stored path relative to the media dir, or `None` when
    /// there was nothing to download.
    async fn download_to_media_dir(
        &self,
        chat_id: &str,
        file_name: &str,
        source_url: &str,
    ) -> Result<Option<String>>;

    /// Download a preview image into the chat's media directory
    async fn download_image_to_media_dir(
        &self,
        chat_id: &str,
        file_name: &str,
        source_url: &str,
    ) -> Result<Option<String>> {
        self.download_to_media_dir(chat_id, file_name, source_url).await
    }
}

/// Strip anything that could escape the chat directory
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = Path::new(name)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .last()
        .unwrap_or("")
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();

    if cleaned.is_empty() {
        crate::messaging::generate_id()
    } else {
        cleaned
    }
}

/// On-disk name for a media row's file
///
/// Peers pick attachment names freely, so the media id keeps two
/// `image.jpg` downloads in one chat from sharing a file.
pub fn stored_file_name(media_id: &str, file_name: &str) -> String {
    format!(
        "{}-{}",
        sanitize_file_name(media_id),
        sanitize_file_name(file_name)
    )
}

/// Relative media path for a file in a chat
pub fn relative_media_path(chat_id: &str, file_name: &str) -> String {
    format!(
        "{}/{}",
        sanitize_file_name(chat_id),
        sanitize_file_name(file_name)
    )
}

/// Delete a downloaded file; one that is already gone is not an error
pub async fn remove_media_file(media_dir: &Path, relative: &str) {
    let path = media_dir.join(relative);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => tracing::debug!("Removed media file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove media file {}: {}", path.display(), e),
    }
}

#[derive(Deserialize)]
struct UploadUrlResponse {
    url: String,
}

/// [`MediaClient`] over HTTP with `reqwest`
pub struct HttpMediaClient {
    client: reqwest::Client,
    media_dir: PathBuf,
    upload_endpoint: Option<String>,
}

impl HttpMediaClient {
    /// Create a client rooted at `config.media_dir`
    pub fn new(config: &CoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            media_dir: config.media_dir.clone(),
            upload_endpoint: config.media_upload_endpoint.clone(),
        })
    }

    /// Absolute path of a relative media path
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.media_dir.join(relative)
    }
}

#[async_trait]
impl MediaClient for HttpMediaClient {
    async fn request_upload_url(&self, chat_id: &str) -> Result<String> {
        let endpoint = self
            .upload_endpoint
            .as_deref()
            .ok_or_else(|| Error::MediaUnavailable("no media upload endpoint configured".into()))?;

        let response = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({ "chatId": chat_id }))
            .send()
            .await?
            .error_for_status()?;

        let body: UploadUrlResponse = response.json().await?;
        Ok(body.url)
    }

    async fn upload_raw_media(&self, local_path: &str, destination_url: &str) -> Result<()> {
        let path = self.resolve(local_path);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            Error::MediaUnavailable(format!("Failed to read {}: {}", path.display(), e))
        })?;

        tracing::debug!("Uploading {} bytes from {}", bytes.len(), path.display());

        self.client
            .put(destination_url)
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn download_to_media_dir(
        &self,
        chat_id: &str,
        file_name: &str,
        source_url: &str,
    ) -> Result<Option<String>> {
        if source_url.is_empty() {
            return Ok(None);
        }

        let response = self
            .client
            .get(source_url)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;

        let relative = relative_media_path(chat_id, file_name);
        let target = self.resolve(&relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::StorageWriteError(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        tokio::fs::write(&target, &bytes).await.map_err(|e| {
            Error::StorageWriteError(format!("Failed to write {}: {}", target.display(), e))
        })?;

        tracing::debug!("Downloaded {} bytes to {}", bytes.len(), target.display());
        Ok(Some(relative))
    }
}
