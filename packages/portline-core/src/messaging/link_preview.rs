//! # Link Preview Enrichment
//!
//! After a link message is stored, its Open Graph metadata is fetched and
//! the preview image is downloaded next to the chat's other media.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      LINK PREVIEW ENRICHMENT                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  stored link message                                                    │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  ┌──────────────────────┐   timeout (2s)   ┌──────────────────────┐    │
//! │  │ OpenGraphFetcher     │ ───── race ───── │ tokio::time::timeout │    │
//! │  │ fetch(url)           │                  │ (fetch is dropped)   │    │
//! │  └──────────┬───────────┘                  └──────────────────────┘    │
//! │             │ og:image                                                  │
//! │             ▼                                                           │
//! │  ┌──────────────────────┐                                              │
//! │  │ MediaClient          │  <media_dir>/<chatId>/<mediaId>-<fileName>   │
//! │  │ download_image_…     │                                              │
//! │  └──────────┬───────────┘                                              │
//! │             ▼                                                           │
//! │  attach_link_preview_in: media row + merged data, one transaction      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every failure leaves the message as it was stored: valid and renderable
//! without a preview.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::content::{generate_id, ContentType, LinkParams, MessageData};
use super::media::{stored_file_name, MediaClient};
use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::storage::{Database, MediaRecord, MessageTable};

/// Open Graph metadata of a page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenGraphData {
    /// `og:title`
    pub title: Option<String>,
    /// `og:description`
    pub description: Option<String>,
    /// `og:image`, absolute
    pub image: Option<String>,
}

impl OpenGraphData {
    /// True when the page had none of the tags
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.image.is_none()
    }
}

/// Fetches Open Graph metadata for a URL
#[async_trait]
pub trait OpenGraphFetcher: Send + Sync {
    /// `Ok(None)` when the page has no usable metadata
    async fn fetch(&self, url: &str) -> Result<Option<OpenGraphData>>;
}

// ============================================================================
// HTTP FETCHER
// ============================================================================

static META_TAG: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?is)<meta\b[^>]*>").ok());

static META_ATTR: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r#"(?is)([a-z][a-z0-9:_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).ok()
});

/// Pull Open Graph tags out of an HTML document
pub fn parse_open_graph(html: &str) -> OpenGraphData {
    let (Some(tag_re), Some(attr_re)) = (META_TAG.as_ref(), META_ATTR.as_ref()) else {
        return OpenGraphData::default();
    };

    let mut tags: HashMap<String, String> = HashMap::new();
    for tag in tag_re.find_iter(html) {
        let mut key = None;
        let mut content = None;
        for attr in attr_re.captures_iter(tag.as_str()) {
            let name = attr[1].to_ascii_lowercase();
            let value = attr
                .get(2)
                .or_else(|| attr.get(3))
                .map(|m| m.as_str())
                .unwrap_or("");
            match name.as_str() {
                "property" | "name" => key = Some(value.to_ascii_lowercase()),
                "content" => content = Some(decode_entities(value.trim())),
                _ => {}
            }
        }
        if let (Some(key), Some(content)) = (key, content) {
            if !content.is_empty() {
                tags.entry(key).or_insert(content);
            }
        }
    }

    let pick = |keys: &[&str]| keys.iter().find_map(|k| tags.get(*k).cloned());
    OpenGraphData {
        title: pick(&["og:title", "twitter:title"]),
        description: pick(&["og:description", "twitter:description", "description"]),
        image: pick(&["og:image", "og:image:url", "twitter:image", "image"]),
    }
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// [`OpenGraphFetcher`] that downloads the page with `reqwest`
pub struct HttpOpenGraphFetcher {
    client: reqwest::Client,
}

impl HttpOpenGraphFetcher {
    /// Create a fetcher using the configured user agent
    pub fn new(config: &CoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl OpenGraphFetcher for HttpOpenGraphFetcher {
    async fn fetch(&self, url: &str) -> Result<Option<OpenGraphData>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let page_url = response.url().clone();
        let html = response.text().await?;

        let mut og = parse_open_graph(&html);
        if og.is_empty() {
            return Ok(None);
        }

        // Relative image paths resolve against the final page URL
        og.image = og
            .image
            .and_then(|image| page_url.join(&image).ok().map(|u| u.to_string()));

        Ok(Some(og))
    }
}

// ============================================================================
// ENRICHER
// ============================================================================

/// What enrichment did to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enrichment {
    /// Metadata stored; `media_id` set when the image was downloaded
    Enriched {
        /// Media row of the preview image
        media_id: Option<String>,
    },
    /// The page had no preview
    NoPreview,
    /// The fetch did not finish in time
    TimedOut,
    /// Not a link message, or no URL in it
    Skipped,
}

/// Runs link-preview enrichment for stored link messages
pub struct LinkEnricher {
    db: Arc<Database>,
    fetcher: Arc<dyn OpenGraphFetcher>,
    media: Arc<dyn MediaClient>,
    timeout: Duration,
}

impl LinkEnricher {
    /// Create an enricher with the given fetch deadline
    pub fn new(
        db: Arc<Database>,
        fetcher: Arc<dyn OpenGraphFetcher>,
        media: Arc<dyn MediaClient>,
        timeout: Duration,
    ) -> Self {
        Self {
            db,
            fetcher,
            media,
            timeout,
        }
    }

    /// Fetch, download and store the preview of one message
    pub async fn enrich(
        &self,
        table: MessageTable,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Enrichment> {
        let Some(record) = self.db.get_message_in(table, chat_id, message_id)? else {
            return Ok(Enrichment::Skipped);
        };
        let MessageData::Link(mut params) = record.data else {
            return Ok(Enrichment::Skipped);
        };
        let Some(url) = params.target_url() else {
            return Ok(Enrichment::Skipped);
        };

        let og = match tokio::time::timeout(self.timeout, self.fetcher.fetch(&url)).await {
            Ok(Ok(Some(og))) => og,
            Ok(Ok(None)) => {
                tracing::debug!("No preview metadata for {}", url);
                return Ok(Enrichment::NoPreview);
            }
            Ok(Err(e)) => {
                tracing::debug!("Link preview fetch failed for {}: {}", url, e);
                return Ok(Enrichment::NoPreview);
            }
            Err(_) => {
                tracing::warn!(
                    "Link preview for message {} timed out after {:?}",
                    message_id,
                    self.timeout
                );
                return Ok(Enrichment::TimedOut);
            }
        };

        let mut preview = LinkParams {
            title: og.title.clone(),
            description: og.description.clone(),
            ..Default::default()
        };

        let mut media = None;
        if let Some(image) = og.image.as_deref() {
            let file_name = params
                .file_name
                .take()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(generate_id);
            let media_id = generate_id();

            match self
                .media
                .download_image_to_media_dir(
                    chat_id,
                    &stored_file_name(&media_id, &file_name),
                    image,
                )
                .await
            {
                Ok(Some(path)) => {
                    let mut row = MediaRecord::new(
                        &media_id,
                        chat_id,
                        message_id,
                        crate::time::now_iso(),
                    );
                    row.media_type = Some(ContentType::Link);
                    row.name = Some(file_name.clone());
                    row.file_path = Some(path.clone());

                    preview.file_uri = Some(path);
                    preview.file_name = Some(file_name);
                    preview.media_id = Some(media_id);
                    media = Some(row);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Failed to download preview image {}: {}", image, e),
            }
        }

        let media_id = media.as_ref().map(|m| m.media_id.clone());
        let stored =
            self.db
                .attach_link_preview_in(table, chat_id, message_id, &preview, media.as_ref())?;

        if !stored {
            tracing::debug!("Message {} vanished before its preview was stored", message_id);
            return Ok(Enrichment::Skipped);
        }

        Ok(Enrichment::Enriched { media_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::content::LinkParams;
    use crate::storage::{MessageRecord, MessageUpdate};

    struct FixedFetcher {
        og: Option<OpenGraphData>,
        delay: Duration,
    }

    #[async_trait]
    impl OpenGraphFetcher for FixedFetcher {
        async fn fetch(&self, _url: &str) -> Result<Option<OpenGraphData>> {
            tokio::time::sleep(self.delay).await;
            Ok(self.og.clone())
        }
    }

    struct FakeMedia;

    #[async_trait]
    impl MediaClient for FakeMedia {
        async fn request_upload_url(&self, _chat_id: &str) -> Result<String> {
            Ok("https://upload.test/1".into())
        }

        async fn upload_raw_media(&self, _local_path: &str, _destination_url: &str) -> Result<()> {
            Ok(())
        }

        async fn download_to_media_dir(
            &self,
            chat_id: &str,
            file_name: &str,
            _source_url: &str,
        ) -> Result<Option<String>> {
            Ok(Some(format!("{}/{}", chat_id, file_name)))
        }
    }

    fn image_preview() -> Option<OpenGraphData> {
        Some(OpenGraphData {
            title: Some("Example".into()),
            description: None,
            image: Some("https://example.com/og.png".into()),
        })
    }

    async fn setup(fetcher: FixedFetcher, timeout: Duration) -> (Arc<Database>, LinkEnricher) {
        let db = Arc::new(Database::open(None).await.unwrap());
        let record = MessageRecord::incoming(
            "c1",
            "l1",
            ContentType::Link,
            MessageData::Link(LinkParams {
                text: "look https://example.com/page".into(),
                ..Default::default()
            }),
            "2024-01-01T00:00:00.000Z",
        );
        db.add_message(&record).unwrap();

        let enricher = LinkEnricher::new(db.clone(), Arc::new(fetcher), Arc::new(FakeMedia), timeout);
        (db, enricher)
    }

    #[test]
    fn test_parse_open_graph() {
        let html = r#"<html><head>
            <meta property="og:title" content="Rust &amp; Friends">
            <meta name="description" content='A page'>
            <META content="/img/cover.png" property="og:image" />
        </head></html>"#;

        let og = parse_open_graph(html);
        assert_eq!(og.title.as_deref(), Some("Rust & Friends"));
        assert_eq!(og.description.as_deref(), Some("A page"));
        assert_eq!(og.image.as_deref(), Some("/img/cover.png"));

        assert!(parse_open_graph("<p>nothing</p>").is_empty());
    }

    #[tokio::test]
    async fn test_enrich_within_timeout() {
        let started = crate::time::now_iso();
        let (db, enricher) = setup(
            FixedFetcher {
                og: image_preview(),
                delay: Duration::from_millis(10),
            },
            Duration::from_secs(2),
        )
        .await;

        let outcome = enricher
            .enrich(MessageTable::Direct, "c1", "l1")
            .await
            .unwrap();
        let Enrichment::Enriched { media_id: Some(media_id) } = outcome else {
            panic!("expected an enriched message, got {:?}", outcome);
        };

        let message = db.get_message("c1", "l1").unwrap().unwrap();
        let MessageData::Link(params) = &message.data else {
            panic!("link data expected");
        };
        assert_eq!(params.title.as_deref(), Some("Example"));
        assert_eq!(params.media_id.as_deref(), Some(media_id.as_str()));
        assert_eq!(message.media_id.as_deref(), Some(media_id.as_str()));

        let media = db.get_media(&media_id).unwrap().unwrap();
        assert_eq!(media.message_id, "l1");
        assert_eq!(media.media_type, Some(ContentType::Link));
        // Row is dated when the preview landed, not when the peer sent the link
        assert!(media.created_on.as_str() >= started.as_str());
        assert_eq!(
            params.file_uri,
            Some(format!(
                "c1/{}-{}",
                media_id,
                params.file_name.as_deref().unwrap()
            ))
        );
    }

    /// Edits the message while the preview is in flight
    struct EditingFetcher {
        db: Arc<Database>,
    }

    #[async_trait]
    impl OpenGraphFetcher for EditingFetcher {
        async fn fetch(&self, _url: &str) -> Result<Option<OpenGraphData>> {
            self.db
                .update_saved_message(
                    "c1",
                    "l1",
                    &MessageUpdate {
                        data: Some(MessageData::Link(LinkParams {
                            text: "edited https://example.com/page".into(),
                            ..Default::default()
                        })),
                        ..Default::default()
                    },
                )
                .unwrap();
            Ok(image_preview())
        }
    }

    #[tokio::test]
    async fn test_edit_during_fetch_survives_preview() {
        let (db, _) = setup(
            FixedFetcher {
                og: None,
                delay: Duration::ZERO,
            },
            Duration::from_secs(2),
        )
        .await;
        let enricher = LinkEnricher::new(
            db.clone(),
            Arc::new(EditingFetcher { db: db.clone() }),
            Arc::new(FakeMedia),
            Duration::from_secs(2),
        );

        let outcome = enricher
            .enrich(MessageTable::Direct, "c1", "l1")
            .await
            .unwrap();
        assert!(matches!(outcome, Enrichment::Enriched { media_id: Some(_) }));

        let message = db.get_message("c1", "l1").unwrap().unwrap();
        let MessageData::Link(params) = &message.data else {
            panic!("link data expected");
        };
        assert_eq!(params.text, "edited https://example.com/page");
        assert_eq!(params.title.as_deref(), Some("Example"));
        assert!(params.file_uri.is_some());
    }

    #[tokio::test]
    async fn test_slow_fetch_leaves_message_untouched() {
        let (db, enricher) = setup(
            FixedFetcher {
                og: image_preview(),
                delay: Duration::from_millis(500),
            },
            Duration::from_millis(50),
        )
        .await;

        let outcome = enricher
            .enrich(MessageTable::Direct, "c1", "l1")
            .await
            .unwrap();
        assert_eq!(outcome, Enrichment::TimedOut);

        let message = db.get_message("c1", "l1").unwrap().unwrap();
        let MessageData::Link(params) = &message.data else {
            panic!("link data expected");
        };
        assert!(params.file_uri.is_none());
        assert!(message.media_id.is_none());
    }

    #[tokio::test]
    async fn test_non_link_is_skipped() {
        let (db, enricher) = setup(
            FixedFetcher {
                og: image_preview(),
                delay: Duration::ZERO,
            },
            Duration::from_secs(2),
        )
        .await;
        db.add_message(&MessageRecord::incoming(
            "c1",
            "t1",
            ContentType::Text,
            MessageData::text("plain"),
            "2024-01-01T00:00:01.000Z",
        ))
        .unwrap();

        assert_eq!(
            enricher
                .enrich(MessageTable::Direct, "c1", "t1")
                .await
                .unwrap(),
            Enrichment::Skipped
        );
        assert_eq!(
            enricher
                .enrich(MessageTable::Direct, "c1", "missing")
                .await
                .unwrap(),
            Enrichment::Skipped
        );
    }
}
