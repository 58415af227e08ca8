use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::recording::Recording;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last published recording of every participant in a room.
pub type RoomRecordings = BTreeMap<ParticipantId, Option<Recording>>;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RoommateEntry {
    pub recording: Option<Recording>,
    #[serde(default)]
    pub muted: bool,
}

/// Snapshot of the room as heard by one listener.
///
/// Built whole and swapped in whole; there is no way to edit one entry of a
/// registry that is already shared.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct RoommateRegistry {
    entries: BTreeMap<ParticipantId, RoommateEntry>,
}

impl RoommateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (ParticipantId, RoommateEntry)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Combines the room's published recordings with the listener's mutes.
    pub fn from_room(recordings: &RoomRecordings, mutes: &MuteList) -> Self {
        Self::from_entries(recordings.iter().map(|(id, recording)| {
            (
                id.clone(),
                RoommateEntry {
                    recording: recording.clone(),
                    muted: mutes.is_muted(id),
                },
            )
        }))
    }

    pub fn with_entry(mut self, id: ParticipantId, entry: RoommateEntry) -> Self {
        self.entries.insert(id, entry);
        self
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&RoommateEntry> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParticipantId, &RoommateEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Participants the local listener has muted.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct MuteList(BTreeSet<ParticipantId>);

impl MuteList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_muted(&self, id: &ParticipantId) -> bool {
        self.0.contains(id)
    }

    /// Flips the mute flag and returns the new state.
    pub fn toggle(&mut self, id: &ParticipantId) -> bool {
        if self.0.remove(id) {
            false
        } else {
            self.0.insert(id.clone());
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Instrument, NoteEvent};

    #[test]
    fn registry_from_room_applies_mutes() {
        let take = Recording::from_events(vec![NoteEvent::closed(
            Instrument::Keyboard,
            0.into(),
            0.0,
            0.5,
        )]);
        let mut room = RoomRecordings::new();
        room.insert("alice".into(), Some(take.clone()));
        room.insert("bob".into(), None);
        let mut mutes = MuteList::new();
        assert!(mutes.toggle(&"alice".into()));

        let registry = RoommateRegistry::from_room(&room, &mutes);
        assert_eq!(registry.len(), 2);
        let alice = registry.get(&"alice".into()).unwrap();
        assert!(alice.muted);
        assert_eq!(alice.recording.as_ref(), Some(&take));
        assert!(!registry.get(&"bob".into()).unwrap().muted);
    }

    #[test]
    fn toggle_twice_unmutes() {
        let mut mutes = MuteList::new();
        let id = ParticipantId::new("carol");
        assert!(mutes.toggle(&id));
        assert!(!mutes.toggle(&id));
        assert!(!mutes.is_muted(&id));
    }

    #[test]
    fn registry_json_is_a_plain_map() {
        let registry = RoommateRegistry::new().with_entry("dave".into(), RoommateEntry::default());
        let json = serde_json::to_string(&registry).unwrap();
        assert_eq!(json, r#"{"dave":{"recording":null,"muted":false}}"#);
    }
}
