use loopjam_domain::{ParticipantId, Recording, RoomRecordings};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Messages exchanged with a room, as JSON text frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RoomMessage {
    JoinRoom { room: String, participant: ParticipantId },
    LeaveRoom { room: String, participant: ParticipantId },
    CreateRoom,
    ListRooms,
    HasJoined { room: String, participant: ParticipantId },
    AvailableRooms { rooms: Vec<String> },
    SendRecording {
        room: String,
        participant: ParticipantId,
        recording: Recording,
    },
    /// Full snapshot of the room's published recordings.
    ReceiveRecording { roommates: RoomRecordings },
    RoomError { message: String },
}

impl RoomMessage {
    pub fn error(message: impl Into<String>) -> Self {
        RoomMessage::RoomError {
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ServiceError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(frame: &str) -> Result<Self, ServiceError> {
        Ok(serde_json::from_str(frame)?)
    }
}
