use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("malformed room message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("room transport closed")]
    Closed,
    #[error("room error: {0}")]
    Room(String),
    #[error("upload failed: {0}")]
    Upload(#[from] reqwest::Error),
    #[error("upload rejected with status {status}")]
    UploadRejected { status: u16 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
