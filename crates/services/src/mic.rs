use std::path::PathBuf;

use async_trait::async_trait;
use loopjam_domain::PitchKey;
use reqwest::multipart::{Form, Part};
use tracing::{debug, info, instrument};

use crate::error::ServiceError;

/// The external collaborator that records the microphone.
#[async_trait]
pub trait MicCapture: Send + Sync {
    async fn start(&self) -> Result<(), ServiceError>;
    /// Ends the take and uploads it as `upload_name`. Returns the identifier
    /// the take is published under.
    async fn stop(&self, upload_name: &PitchKey) -> Result<PitchKey, ServiceError>;
}

/// Client for the audio upload endpoint.
#[derive(Clone)]
pub struct AudioUploadClient {
    endpoint: String,
    client: reqwest::Client,
}

impl AudioUploadClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn upload_url(&self) -> String {
        format!("{}/api/audioupload", self.endpoint.trim_end_matches('/'))
    }

    /// Posts one ogg take as the multipart field `mic`.
    #[instrument(skip(self, audio), fields(bytes = audio.len()))]
    pub async fn upload(&self, file_name: &str, audio: Vec<u8>) -> Result<PitchKey, ServiceError> {
        let part = Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str("audio/ogg")?;
        let form = Form::new().part("mic", part);
        let response = self
            .client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::UploadRejected {
                status: status.as_u16(),
            });
        }
        let id: String = response.json().await?;
        info!(%id, "take uploaded");
        Ok(PitchKey::new(id))
    }
}

/// Stands in for a live microphone by uploading a prepared ogg file for
/// every take.
pub struct FileMicCapture {
    source: PathBuf,
    uploader: AudioUploadClient,
}

impl FileMicCapture {
    pub fn new(source: impl Into<PathBuf>, uploader: AudioUploadClient) -> Self {
        Self {
            source: source.into(),
            uploader,
        }
    }
}

#[async_trait]
impl MicCapture for FileMicCapture {
    async fn start(&self) -> Result<(), ServiceError> {
        debug!(source = %self.source.display(), "mic capture started");
        Ok(())
    }

    async fn stop(&self, upload_name: &PitchKey) -> Result<PitchKey, ServiceError> {
        let source = self.source.clone();
        let audio = tokio::task::spawn_blocking(move || std::fs::read(source))
            .await
            .map_err(|err| ServiceError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))??;
        self.uploader.upload(upload_name.as_str(), audio).await
    }
}
