use loopjam_domain::{Instrument, ParticipantId, PitchKey};
use loopjam_sync::SessionCommand;

/// One line typed at the prompt.
#[derive(Debug, PartialEq)]
pub enum Input {
    Session(SessionCommand),
    Mute(ParticipantId),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  play [bpm] [beats]   start the metronome and loop
  stop                 stop playing
  rec                  record from the start of the next loop
  now                  record right away
  end                  stop recording
  share | discard      publish or drop the finished take
  note <key>           press a key on the selected instrument
                       (cents from A4 on keyboard, else a sample name)
  off <key>            release a key
  inst <name>          keyboard, mic, or a sample folder
  mute <name>          toggle a roommate's mute
  quit";

pub fn parse(line: &str, default_bpm: f64, default_beats: u32) -> Result<Input, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty command".into());
    };
    let mut arg = |what: &str| {
        words
            .next()
            .map(str::to_string)
            .ok_or_else(|| format!("{verb} needs {what}"))
    };
    let command = match verb {
        "play" => {
            let bpm = match arg("a tempo") {
                Ok(bpm) => bpm.parse().map_err(|_| format!("bad tempo {bpm}"))?,
                Err(_) => default_bpm,
            };
            let time_signature = match arg("beats per measure") {
                Ok(beats) => beats.parse().map_err(|_| format!("bad beat count {beats}"))?,
                Err(_) => default_beats,
            };
            SessionCommand::StartPlaying { bpm, time_signature }
        }
        "stop" => SessionCommand::StopPlaying,
        "rec" => SessionCommand::RequestRecording,
        "now" => SessionCommand::StartRecordingNow,
        "end" => SessionCommand::StopRecording,
        "share" => SessionCommand::ShareRecording,
        "discard" => SessionCommand::DiscardRecording,
        "note" => SessionCommand::NoteOn {
            instrument: None,
            pitch_key: PitchKey::new(arg("a key")?),
        },
        "off" => SessionCommand::NoteOff {
            pitch_key: PitchKey::new(arg("a key")?),
        },
        "inst" => SessionCommand::SelectInstrument(Instrument::from(arg("an instrument")?)),
        "mute" => return Ok(Input::Mute(ParticipantId::new(arg("a name")?))),
        "help" | "?" => return Ok(Input::Help),
        "quit" | "exit" => return Ok(Input::Quit),
        other => return Err(format!("unknown command {other}")),
    };
    Ok(Input::Session(command))
}
