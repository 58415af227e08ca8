//! Room transport and microphone upload collaborators.

pub mod error;
pub mod mic;
pub mod transport;
pub mod wire;

pub use error::ServiceError;
pub use mic::{AudioUploadClient, FileMicCapture, MicCapture};
pub use transport::{LoopbackRoom, LoopbackTransport, RoomClient, RoomTransport};
pub use wire::RoomMessage;
