use anyhow::{anyhow, Result};
use loopjam_domain::PitchKey;
use midir::{MidiInput, MidiInputConnection};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::driver::SessionCommand;

/// MIDI note number of A4, which maps to pitch key `0`.
const REFERENCE_NOTE: i32 = 69;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NoteRequest {
    On(PitchKey),
    Off(PitchKey),
}

impl NoteRequest {
    pub fn into_command(self) -> SessionCommand {
        match self {
            NoteRequest::On(pitch_key) => SessionCommand::NoteOn {
                instrument: None,
                pitch_key,
            },
            NoteRequest::Off(pitch_key) => SessionCommand::NoteOff { pitch_key },
        }
    }
}

/// Maps a raw MIDI message to a note in cents from A4. A note-on with velocity zero
/// is a note-off; everything else is ignored.
pub fn note_request_from_midi(message: &[u8]) -> Option<NoteRequest> {
    let (&status, data) = message.split_first()?;
    let note = *data.first()?;
    let velocity = data.get(1).copied().unwrap_or(0);
    let pitch_key = PitchKey::from((i32::from(note) - REFERENCE_NOTE) * 100);
    match status & 0xF0 {
        0x90 if velocity > 0 => Some(NoteRequest::On(pitch_key)),
        0x90 | 0x80 => Some(NoteRequest::Off(pitch_key)),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MidiDevice {
    pub name: String,
}

/// Keeps a MIDI input open and forwards its notes as session commands.
pub struct MidiBridge {
    port_name: String,
    _connection: MidiInputConnection<()>,
}

impl MidiBridge {
    pub fn list_inputs() -> Result<Vec<MidiDevice>> {
        let input = MidiInput::new("loopjam")?;
        Ok(input
            .ports()
            .iter()
            .map(|port| MidiDevice {
                name: input.port_name(port).unwrap_or_else(|_| "Unknown".into()),
            })
            .collect())
    }

    /// Connects to the first input whose name contains `name`.
    pub fn connect(name: &str, commands: mpsc::Sender<SessionCommand>) -> Result<Self> {
        let input = MidiInput::new("loopjam")?;
        let port = input
            .ports()
            .into_iter()
            .find(|port| {
                input
                    .port_name(port)
                    .map(|port_name| port_name.contains(name))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("midi port not found: {name}"))?;
        let port_name = input.port_name(&port)?;
        let connection = input
            .connect(
                &port,
                "loopjam-in",
                move |_stamp, message, _| {
                    if let Some(request) = note_request_from_midi(message) {
                        if commands.try_send(request.into_command()).is_err() {
                            warn!("session command queue full; midi note dropped");
                        }
                    }
                },
                (),
            )
            .map_err(|err| anyhow!("midi connect error: {err}"))?;
        info!(port = %port_name, "midi input connected");
        Ok(Self {
            port_name,
            _connection: connection,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_maps_to_cents_from_a4() {
        assert_eq!(
            note_request_from_midi(&[0x90, 69, 100]),
            Some(NoteRequest::On(PitchKey::from(0)))
        );
        assert_eq!(
            note_request_from_midi(&[0x91, 60, 1]),
            Some(NoteRequest::On(PitchKey::from(-900)))
        );
    }

    #[test]
    fn zero_velocity_and_note_off_release() {
        assert_eq!(
            note_request_from_midi(&[0x90, 81, 0]),
            Some(NoteRequest::Off(PitchKey::from(1200)))
        );
        assert_eq!(
            note_request_from_midi(&[0x80, 81, 64]),
            Some(NoteRequest::Off(PitchKey::from(1200)))
        );
    }

    #[test]
    fn notes_play_the_selected_instrument() {
        assert_eq!(
            NoteRequest::On(PitchKey::from(0)).into_command(),
            SessionCommand::NoteOn {
                instrument: None,
                pitch_key: PitchKey::from(0),
            }
        );
    }

    #[test]
    fn other_messages_are_ignored() {
        assert_eq!(note_request_from_midi(&[0xB0, 64, 127]), None);
        assert_eq!(note_request_from_midi(&[0x90]), None);
        assert_eq!(note_request_from_midi(&[]), None);
    }

    #[test]
    fn list_inputs_does_not_panic() {
        let _ = MidiBridge::list_inputs();
    }
}
