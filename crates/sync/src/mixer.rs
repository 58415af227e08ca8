use loopjam_domain::{ParticipantId, Recording, RoommateRegistry, ScheduledNote};

/// What the local listener contributes to a loop's playback.
#[derive(Clone, Copy, Debug)]
pub struct ListenerView<'a> {
    pub local: &'a ParticipantId,
    /// Finished local take to replay, if any.
    pub local_take: Option<&'a Recording>,
    /// Skip the local participant's own registry entry.
    pub suppress_own_entry: bool,
}

/// Every note to schedule for the loop starting at `anchor`.
///
/// Muted participants contribute nothing. Events that were never closed end
/// with the loop.
pub fn loop_playback(
    listener: ListenerView<'_>,
    roommates: &RoommateRegistry,
    anchor: f64,
    loop_duration: f64,
) -> Vec<ScheduledNote> {
    let mut notes: Vec<ScheduledNote> = listener
        .local_take
        .map(|take| take.anchored(anchor, loop_duration).collect())
        .unwrap_or_default();

    for (participant, entry) in roommates.iter() {
        if entry.muted {
            continue;
        }
        if participant == listener.local && listener.suppress_own_entry {
            continue;
        }
        if let Some(recording) = &entry.recording {
            notes.extend(recording.anchored(anchor, loop_duration));
        }
    }
    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use loopjam_domain::{Instrument, NoteEvent, PitchKey, RoommateEntry};

    fn take(start: f64, stop: Option<f64>) -> Recording {
        let mut event = NoteEvent::open(Instrument::Keyboard, PitchKey::from(0), start);
        if let Some(stop) = stop {
            event.close_at(stop);
        }
        Recording::from_events(vec![event])
    }

    fn entry(recording: Recording, muted: bool) -> RoommateEntry {
        RoommateEntry {
            recording: Some(recording),
            muted,
        }
    }

    #[test]
    fn roommates_are_anchored_at_loop_start() {
        let me = ParticipantId::from("me");
        let registry = RoommateRegistry::new()
            .with_entry("bo".into(), entry(take(0.5, Some(1.0)), false));
        let view = ListenerView {
            local: &me,
            local_take: None,
            suppress_own_entry: false,
        };
        let notes = loop_playback(view, &registry, 20.0, 4.0);
        assert_eq!(notes.len(), 1);
        assert_relative_eq!(notes[0].start, 20.5);
        assert_relative_eq!(notes[0].stop, 21.0);
        assert_eq!(notes[0].relative_to(20.0), take(0.5, Some(1.0)).events()[0]);
    }

    #[test]
    fn muted_roommate_is_never_played() {
        let me = ParticipantId::from("me");
        let registry = RoommateRegistry::new()
            .with_entry("bo".into(), entry(take(0.0, Some(1.0)), true))
            .with_entry("cy".into(), entry(take(1.0, Some(2.0)), false));
        let view = ListenerView {
            local: &me,
            local_take: None,
            suppress_own_entry: false,
        };
        for anchor in [0.0, 4.0, 8.0] {
            let notes = loop_playback(view, &registry, anchor, 4.0);
            assert_eq!(notes.len(), 1);
            assert_relative_eq!(notes[0].start, anchor + 1.0);
        }
    }

    #[test]
    fn own_entry_follows_suppression() {
        let me = ParticipantId::from("me");
        let registry = RoommateRegistry::new().with_entry(me.clone(), entry(take(0.0, Some(1.0)), false));
        let mut view = ListenerView {
            local: &me,
            local_take: None,
            suppress_own_entry: true,
        };
        assert!(loop_playback(view, &registry, 0.0, 4.0).is_empty());

        // a second listener still hears the same entry
        let other = ParticipantId::from("other");
        let their_view = ListenerView {
            local: &other,
            local_take: None,
            suppress_own_entry: true,
        };
        assert_eq!(loop_playback(their_view, &registry, 0.0, 4.0).len(), 1);

        view.suppress_own_entry = false;
        assert_eq!(loop_playback(view, &registry, 0.0, 4.0).len(), 1);
    }

    #[test]
    fn open_events_end_with_the_loop() {
        let me = ParticipantId::from("me");
        let local = take(3.0, None);
        let view = ListenerView {
            local: &me,
            local_take: Some(&local),
            suppress_own_entry: true,
        };
        let notes = loop_playback(view, &RoommateRegistry::new(), 8.0, 4.0);
        assert_relative_eq!(notes[0].stop, 12.0);
    }

    #[test]
    fn entries_without_recordings_are_skipped() {
        let me = ParticipantId::from("me");
        let registry = RoommateRegistry::new().with_entry(
            "bo".into(),
            RoommateEntry {
                recording: None,
                muted: false,
            },
        );
        let view = ListenerView {
            local: &me,
            local_take: None,
            suppress_own_entry: false,
        };
        assert!(loop_playback(view, &registry, 0.0, 4.0).is_empty());
    }
}
