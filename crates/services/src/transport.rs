use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use loopjam_domain::{MuteList, ParticipantId, Recording, RoomRecordings, RoommateRegistry};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::wire::RoomMessage;

/// A connection to a room server speaking [`RoomMessage`] frames.
#[async_trait]
pub trait RoomTransport: Send {
    async fn send(&mut self, message: RoomMessage) -> Result<(), ServiceError>;
    async fn next_message(&mut self) -> Result<RoomMessage, ServiceError>;
}

const FRAME_BACKLOG: usize = 64;

/// In-process room. Keeps each member's last published recording and
/// broadcasts the whole room to every member whenever it changes.
pub struct LoopbackRoom {
    name: String,
    recordings: Mutex<RoomRecordings>,
    frames: broadcast::Sender<String>,
}

impl LoopbackRoom {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let (frames, _) = broadcast::channel(FRAME_BACKLOG);
        Arc::new(Self {
            name: name.into(),
            recordings: Mutex::new(RoomRecordings::new()),
            frames,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> RoomRecordings {
        self.recordings().clone()
    }

    pub fn connect(self: &Arc<Self>) -> LoopbackTransport {
        LoopbackTransport {
            room: Arc::clone(self),
            frames: self.frames.subscribe(),
            replies: VecDeque::new(),
        }
    }

    /// Handles one frame from a member. Returns the reply meant for that
    /// member alone, if any.
    pub fn receive(&self, frame: &str) -> Result<Option<String>, ServiceError> {
        let reply = match RoomMessage::decode(frame)? {
            RoomMessage::JoinRoom { room, participant } => {
                if room != self.name {
                    Some(RoomMessage::error(format!("no room named {room}")))
                } else {
                    self.recordings()
                        .entry(participant.clone())
                        .or_insert(None);
                    info!(room = %self.name, %participant, "participant joined");
                    self.publish_snapshot()?;
                    Some(RoomMessage::HasJoined { room, participant })
                }
            }
            RoomMessage::LeaveRoom { participant, .. } => {
                if self.recordings().remove(&participant).is_some() {
                    info!(room = %self.name, %participant, "participant left");
                    self.publish_snapshot()?;
                }
                None
            }
            RoomMessage::ListRooms => Some(RoomMessage::AvailableRooms {
                rooms: vec![self.name.clone()],
            }),
            RoomMessage::CreateRoom => Some(RoomMessage::error("a loopback room cannot create rooms")),
            RoomMessage::SendRecording {
                room,
                participant,
                recording,
            } => {
                let events = recording.len();
                let stored = room == self.name && self.store(&participant, recording);
                if stored {
                    debug!(%participant, events, "recording published");
                    self.publish_snapshot()?;
                    None
                } else {
                    Some(RoomMessage::error(format!("{participant} is not in room {room}")))
                }
            }
            other => Some(RoomMessage::error(format!("unexpected message from a member: {other:?}"))),
        };
        reply.map(|message| message.encode()).transpose()
    }

    /// Replaces a member's recording. Returns false for non-members.
    fn store(&self, participant: &ParticipantId, recording: Recording) -> bool {
        match self.recordings().get_mut(participant) {
            Some(slot) => {
                *slot = Some(recording);
                true
            }
            None => false,
        }
    }

    fn publish_snapshot(&self) -> Result<(), ServiceError> {
        let frame = RoomMessage::ReceiveRecording {
            roommates: self.snapshot(),
        }
        .encode()?;
        // no subscribers is fine
        let _ = self.frames.send(frame);
        Ok(())
    }

    fn recordings(&self) -> MutexGuard<'_, RoomRecordings> {
        self.recordings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One member's connection to a [`LoopbackRoom`].
pub struct LoopbackTransport {
    room: Arc<LoopbackRoom>,
    frames: broadcast::Receiver<String>,
    replies: VecDeque<String>,
}

#[async_trait]
impl RoomTransport for LoopbackTransport {
    async fn send(&mut self, message: RoomMessage) -> Result<(), ServiceError> {
        if let Some(reply) = self.room.receive(&message.encode()?)? {
            self.replies.push_back(reply);
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Result<RoomMessage, ServiceError> {
        if let Some(reply) = self.replies.pop_front() {
            return RoomMessage::decode(&reply);
        }
        loop {
            match self.frames.recv().await {
                Ok(frame) => return RoomMessage::decode(&frame),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // only the newest snapshot matters
                    warn!(skipped, "room frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(ServiceError::Closed),
            }
        }
    }
}

/// A participant's view of a room: publishes their takes and turns room
/// snapshots into [`RoommateRegistry`] values with their own mutes applied.
pub struct RoomClient<T> {
    transport: T,
    room: String,
    participant: ParticipantId,
    mutes: MuteList,
    latest: RoomRecordings,
}

impl<T: RoomTransport> RoomClient<T> {
    pub async fn join(
        mut transport: T,
        room: impl Into<String>,
        participant: ParticipantId,
    ) -> Result<Self, ServiceError> {
        let room = room.into();
        transport
            .send(RoomMessage::JoinRoom {
                room: room.clone(),
                participant: participant.clone(),
            })
            .await?;
        Ok(Self {
            transport,
            room,
            participant,
            mutes: MuteList::new(),
            latest: RoomRecordings::new(),
        })
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub async fn publish(&mut self, recording: Recording) -> Result<(), ServiceError> {
        self.transport
            .send(RoomMessage::SendRecording {
                room: self.room.clone(),
                participant: self.participant.clone(),
                recording,
            })
            .await
    }

    /// Flips the mute flag for `participant` and returns the registry with
    /// the change applied.
    pub fn toggle_mute(&mut self, participant: &ParticipantId) -> RoommateRegistry {
        let muted = self.mutes.toggle(participant);
        debug!(%participant, muted, "mute toggled");
        self.registry()
    }

    pub fn registry(&self) -> RoommateRegistry {
        RoommateRegistry::from_room(&self.latest, &self.mutes)
    }

    /// Waits for the next room snapshot.
    pub async fn next_registry(&mut self) -> Result<RoommateRegistry, ServiceError> {
        loop {
            match self.transport.next_message().await? {
                RoomMessage::ReceiveRecording { roommates } => {
                    self.latest = roommates;
                    return Ok(self.registry());
                }
                RoomMessage::RoomError { message } => return Err(ServiceError::Room(message)),
                RoomMessage::HasJoined { room, participant } => {
                    info!(%room, %participant, "joined room");
                }
                other => debug!(?other, "ignoring room message"),
            }
        }
    }

    pub async fn leave(mut self) -> Result<(), ServiceError> {
        self.transport
            .send(RoomMessage::LeaveRoom {
                room: self.room.clone(),
                participant: self.participant.clone(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopjam_domain::{Instrument, NoteEvent, PitchKey};

    fn take() -> Recording {
        Recording::from_events(vec![NoteEvent::closed(
            Instrument::Keyboard,
            PitchKey::from(0),
            0.0,
            1.0,
        )])
    }

    #[tokio::test]
    async fn published_take_reaches_every_member() {
        let room = LoopbackRoom::new("lobby");
        let mut ana = RoomClient::join(room.connect(), "lobby", "ana".into()).await.unwrap();
        let mut bo = RoomClient::join(room.connect(), "lobby", "bo".into()).await.unwrap();

        ana.publish(take()).await.unwrap();

        let mut registry = bo.next_registry().await.unwrap();
        while registry.get(&"ana".into()).and_then(|entry| entry.recording.as_ref()).is_none() {
            registry = bo.next_registry().await.unwrap();
        }
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&"bo".into()).unwrap().recording.is_none());

        let mut own = ana.next_registry().await.unwrap();
        while own.get(&"ana".into()).and_then(|entry| entry.recording.as_ref()).is_none() {
            own = ana.next_registry().await.unwrap();
        }
        assert_eq!(own.get(&"ana".into()).unwrap().recording, Some(take()));
    }

    #[tokio::test]
    async fn mutes_are_local_to_one_listener() {
        let room = LoopbackRoom::new("lobby");
        let mut ana = RoomClient::join(room.connect(), "lobby", "ana".into()).await.unwrap();
        let mut bo = RoomClient::join(room.connect(), "lobby", "bo".into()).await.unwrap();
        ana.publish(take()).await.unwrap();
        while bo.registry().get(&"ana".into()).and_then(|e| e.recording.as_ref()).is_none() {
            bo.next_registry().await.unwrap();
        }

        let muted = bo.toggle_mute(&"ana".into());
        assert!(muted.get(&"ana".into()).unwrap().muted);
        assert!(!ana.registry().get(&"ana".into()).map(|e| e.muted).unwrap_or(false));

        let unmuted = bo.toggle_mute(&"ana".into());
        assert!(!unmuted.get(&"ana".into()).unwrap().muted);
    }

    #[tokio::test]
    async fn wrong_room_is_reported() {
        let room = LoopbackRoom::new("lobby");
        let mut client = RoomClient::join(room.connect(), "attic", "ana".into()).await.unwrap();
        assert!(matches!(client.next_registry().await, Err(ServiceError::Room(_))));
        assert!(room.snapshot().is_empty());
    }

    #[tokio::test]
    async fn publishing_without_joining_is_rejected() {
        let room = LoopbackRoom::new("lobby");
        let reply = room
            .receive(
                &RoomMessage::SendRecording {
                    room: "lobby".into(),
                    participant: "ghost".into(),
                    recording: take(),
                }
                .encode()
                .unwrap(),
            )
            .unwrap();
        assert!(matches!(
            RoomMessage::decode(&reply.unwrap()).unwrap(),
            RoomMessage::RoomError { .. }
        ));
    }

    #[tokio::test]
    async fn leaving_removes_the_member() {
        let room = LoopbackRoom::new("lobby");
        let ana = RoomClient::join(room.connect(), "lobby", "ana".into()).await.unwrap();
        assert_eq!(room.snapshot().len(), 1);
        ana.leave().await.unwrap();
        assert!(room.snapshot().is_empty());
    }

    #[test]
    fn list_rooms_names_the_loopback_room() {
        let room = LoopbackRoom::new("lobby");
        let reply = room.receive(r#"{"type":"listRooms"}"#).unwrap().unwrap();
        assert_eq!(
            RoomMessage::decode(&reply).unwrap(),
            RoomMessage::AvailableRooms {
                rooms: vec!["lobby".into()]
            }
        );
    }
}
