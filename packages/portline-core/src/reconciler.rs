//! # Reconciler
//!
//! Backlog and periodic housekeeping: re-drives journaled sends and removes
//! messages whose disappearing timer has run out.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         RECONCILE PASS                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   tick (interval) ──► run_once ─┬─► retry_journaled                     │
//! │                                 │     get_unsent ──► retry_record       │
//! │                                 │                                       │
//! │                                 ├─► delete_expired_messages             │
//! │                                 └─► delete_expired_group_messages       │
//! │                                       media row + file ──► row ──► CAS  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::messaging::media::remove_media_file;
use crate::messaging::SendDispatcher;
use crate::storage::{Database, MessageTable};

/// Counts from one reconcile pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Journaled messages handed back to the dispatcher
    pub retried: usize,
    /// Expired direct messages removed
    pub expired_direct: usize,
    /// Expired group messages removed
    pub expired_group: usize,
}

/// Re-drives unsent messages and purges expired ones
pub struct Reconciler {
    db: Arc<Database>,
    dispatcher: Arc<SendDispatcher>,
    media_dir: PathBuf,
}

impl Reconciler {
    /// Create a reconciler over the dispatcher's store
    pub fn new(dispatcher: Arc<SendDispatcher>, media_dir: PathBuf) -> Self {
        Self {
            db: dispatcher.database().clone(),
            dispatcher,
            media_dir,
        }
    }

    /// Retry every journaled direct message, oldest first
    pub async fn retry_journaled(&self) -> Result<usize> {
        let unsent = self.db.get_unsent()?;
        let count = unsent.len();
        if count > 0 {
            tracing::info!("Retrying {} journaled messages", count);
        }
        for record in unsent {
            self.dispatcher.retry_record(record).await;
        }
        Ok(count)
    }

    /// Remove direct messages that expired before `now`
    pub async fn delete_expired_messages(&self, now: &str) -> Result<usize> {
        self.delete_expired(MessageTable::Direct, now).await
    }

    /// Remove group messages that expired before `now`
    pub async fn delete_expired_group_messages(&self, now: &str) -> Result<usize> {
        self.delete_expired(MessageTable::Group, now).await
    }

    async fn delete_expired(&self, table: MessageTable, now: &str) -> Result<usize> {
        let expired = self.db.get_expired_messages_in(table, now)?;
        let mut removed = 0;

        for record in expired {
            if let Some(media_id) = record.media_id.as_deref() {
                if let Some(path) = self.db.delete_media(media_id)? {
                    remove_media_file(&self.media_dir, &path).await;
                }
            }

            if self
                .db
                .permanently_delete_message_in(table, &record.chat_id, &record.message_id)?
            {
                removed += 1;
            }
            self.db.update_connection_if_latest_message_is(
                &record.chat_id,
                &record.message_id,
                "",
                None,
            )?;
        }

        if removed > 0 {
            tracing::debug!("Removed {} expired messages from {}", removed, table.name());
        }
        Ok(removed)
    }

    /// One full pass: retries and both expiry sweeps
    pub async fn run_once(&self) -> Result<ReconcileReport> {
        let now = crate::time::now_iso();
        let (retried, expired_direct, expired_group) = futures::join!(
            self.retry_journaled(),
            self.delete_expired_messages(&now),
            self.delete_expired_group_messages(&now),
        );

        Ok(ReconcileReport {
            retried: retried?,
            expired_direct: expired_direct?,
            expired_group: expired_group?,
        })
    }

    /// Run [`Reconciler::run_once`] every `interval` until shut down
    ///
    /// The first pass runs immediately.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> ReconcilerHandle {
        let (shutdown, mut stop) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::warn!("Reconcile pass failed: {}", e);
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
            tracing::debug!("Reconciler stopped");
        });

        ReconcilerHandle { shutdown, task }
    }
}

/// Stops a spawned reconciler
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Signal the loop and wait for it to finish its current pass
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Reconciler task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::content::MediaParams;
    use crate::messaging::testing::{FakeMedia, RecordingTransport};
    use crate::messaging::{ContentType, MessageData, MessageStatus};
    use crate::storage::{ChatKind, MediaRecord, MessageRecord, SummaryUpdate};
    use crate::Error;

    struct Harness {
        db: Arc<Database>,
        transport: Arc<RecordingTransport>,
        reconciler: Arc<Reconciler>,
        dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let db = Arc::new(Database::open(None).await.unwrap());
        db.create_chat("c1", "Ada", ChatKind::Direct).unwrap();
        db.create_chat("g1", "Team", ChatKind::Group).unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Arc::new(SendDispatcher::new(
            db.clone(),
            transport.clone(),
            Arc::new(FakeMedia::default()),
        ));
        let dir = tempfile::tempdir().unwrap();
        let reconciler = Arc::new(Reconciler::new(dispatcher, dir.path().to_path_buf()));
        Harness {
            db,
            transport,
            reconciler,
            dir,
        }
    }

    fn expired(chat: &str, id: &str) -> MessageRecord {
        let mut record = MessageRecord::incoming(
            chat,
            id,
            ContentType::Text,
            MessageData::text("gone soon"),
            "2024-01-01T00:00:00.000Z",
        );
        record.expires_on = Some("2024-01-01T00:01:00.000Z".into());
        record
    }

    #[tokio::test]
    async fn test_retry_journaled_sends_backlog() {
        let h = harness().await;
        for id in ["m1", "m2"] {
            h.db.add_message(&MessageRecord::outgoing(
                "c1",
                id,
                ContentType::Text,
                MessageData::text(id),
            ))
            .unwrap();
        }

        assert_eq!(h.reconciler.retry_journaled().await.unwrap(), 2);
        assert_eq!(h.transport.sent_ids().len(), 2);
        assert!(h.db.get_unsent().unwrap().is_empty());

        // Nothing left to do
        assert_eq!(h.reconciler.retry_journaled().await.unwrap(), 0);
        assert_eq!(h.transport.sent_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_keeps_backlog_while_offline() {
        let h = harness().await;
        h.db.add_message(&MessageRecord::outgoing(
            "c1",
            "m1",
            ContentType::Text,
            MessageData::text("later"),
        ))
        .unwrap();
        h.transport.fail_with(|| Error::NotConnected);

        h.reconciler.retry_journaled().await.unwrap();
        let stored = h.db.get_message("c1", "m1").unwrap().unwrap();
        assert_eq!(stored.message_status, MessageStatus::Journaled);
    }

    #[tokio::test]
    async fn test_expired_messages_are_removed_with_media() {
        let h = harness().await;
        let file = h.dir.path().join("c1").join("a.png");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"png").unwrap();

        let mut media = MediaRecord::new("md1", "c1", "e1", "2024-01-01T00:00:00.000Z");
        media.file_path = Some("c1/a.png".into());
        let mut record = MessageRecord::incoming(
            "c1",
            "e1",
            ContentType::Image,
            MessageData::Media(MediaParams {
                file_name: "a.png".into(),
                media_id: Some("md1".into()),
                ..Default::default()
            }),
            "2024-01-01T00:00:00.000Z",
        );
        record.media_id = Some("md1".into());
        record.expires_on = Some("2024-01-01T00:01:00.000Z".into());
        h.db.add_message_with_media_in(MessageTable::Direct, &record, Some(&media))
            .unwrap();
        h.db.update_connection_on_new_message(
            "c1",
            &SummaryUpdate {
                text: "📷 image".into(),
                recent_message_type: ContentType::Image,
                latest_message_id: "e1".into(),
                timestamp: record.timestamp.clone(),
                read_status: MessageStatus::Latest,
                increment_unread: true,
            },
        )
        .unwrap();

        let removed = h
            .reconciler
            .delete_expired_messages("2024-01-02T00:00:00.000Z")
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(h.db.get_message("c1", "e1").unwrap().is_none());
        assert!(h.db.get_media("md1").unwrap().is_none());
        assert!(!file.exists());
        assert_eq!(
            h.db.get_connection("c1").unwrap().unwrap().text.as_deref(),
            Some("")
        );
    }

    #[tokio::test]
    async fn test_unexpired_messages_stay() {
        let h = harness().await;
        h.db.add_message(&expired("c1", "e1")).unwrap();

        let removed = h
            .reconciler
            .delete_expired_messages("2024-01-01T00:00:30.000Z")
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert!(h.db.get_message("c1", "e1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_run_once_covers_both_tables() {
        let h = harness().await;
        h.db.add_message(&expired("c1", "e1")).unwrap();
        let mut group = expired("g1", "ge1");
        group.member_id = Some("alice".into());
        h.db.add_group_message(&group).unwrap();
        h.db.add_message(&MessageRecord::outgoing(
            "c1",
            "m1",
            ContentType::Text,
            MessageData::text("pending"),
        ))
        .unwrap();

        let report = h.reconciler.run_once().await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                retried: 1,
                expired_direct: 1,
                expired_group: 1,
            }
        );
        assert!(h.db.get_group_message("g1", "ge1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_spawned_loop_runs_and_stops() {
        let h = harness().await;
        h.db.add_message(&MessageRecord::outgoing(
            "c1",
            "m1",
            ContentType::Text,
            MessageData::text("tick"),
        ))
        .unwrap();

        let handle = h.reconciler.clone().spawn(Duration::from_millis(20));
        for _ in 0..50 {
            if !h.transport.sent_ids().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert_eq!(h.transport.sent_ids(), vec!["m1".to_string()]);
    }
}
