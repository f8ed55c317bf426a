//! Transport and media doubles for pipeline tests.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::media::MediaClient;
use super::transport::{Sealing, Transport, WireMessage};
use crate::error::{Error, Result};

/// Records every transmitted message; can be told to fail
#[derive(Default)]
pub(crate) struct RecordingTransport {
    pub sent: Mutex<Vec<(String, WireMessage, Sealing)>>,
    pub failure: Mutex<Option<fn() -> Error>>,
}

impl RecordingTransport {
    pub fn fail_with(&self, failure: fn() -> Error) {
        *self.failure.lock() = Some(failure);
    }

    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    pub fn sent_ids(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|(_, wire, _)| wire.message_id.clone())
            .collect()
    }

    pub fn last(&self) -> Option<(String, WireMessage, Sealing)> {
        self.sent.lock().last().cloned()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn encrypt_and_transmit(
        &self,
        chat_id: &str,
        payload: &[u8],
        sealing: Sealing,
    ) -> Result<()> {
        let failure = *self.failure.lock();
        if let Some(failure) = failure {
            return Err(failure());
        }
        let wire = WireMessage::decode(payload)?;
        self.sent.lock().push((chat_id.to_string(), wire, sealing));
        Ok(())
    }
}

/// Pretends to upload and download; counts uploads
#[derive(Default)]
pub(crate) struct FakeMedia {
    pub uploads: Mutex<Vec<String>>,
    pub downloads: Mutex<Vec<String>>,
    pub offline: Mutex<bool>,
}

#[async_trait]
impl MediaClient for FakeMedia {
    async fn request_upload_url(&self, chat_id: &str) -> Result<String> {
        let offline = *self.offline.lock();
        if offline {
            return Err(Error::ConnectionFailed("media host unreachable".into()));
        }
        let n = self.uploads.lock().len();
        Ok(format!("https://media.test/{}/{}", chat_id, n))
    }

    async fn upload_raw_media(&self, local_path: &str, _destination_url: &str) -> Result<()> {
        self.uploads.lock().push(local_path.to_string());
        Ok(())
    }

    async fn download_to_media_dir(
        &self,
        chat_id: &str,
        file_name: &str,
        source_url: &str,
    ) -> Result<Option<String>> {
        self.downloads.lock().push(source_url.to_string());
        Ok(Some(format!("{}/{}", chat_id, file_name)))
    }
}
