mod input;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use loopjam_audio::{AudioBackend, CpalBackend, FileSampleLoader, NullBackend, NullOutput, StreamConfig};
use loopjam_domain::{ParticipantId, Recording, RoommateRegistry, SessionSettings};
use loopjam_services::{AudioUploadClient, FileMicCapture, LoopbackRoom, LoopbackTransport, MicCapture, RoomClient};
use loopjam_sync::{MidiBridge, SessionCommand, SessionDriver, SessionEvent, SessionIdentity};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::input::{Input, HELP};

#[derive(Parser, Debug)]
#[command(author, version, about = "Loop-quantized jam session client", long_about = None)]
struct Cli {
    /// YAML session settings
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 120.0)]
    bpm: f64,
    /// Beats per measure
    #[arg(long, default_value_t = 4)]
    time_signature: u32,
    /// Loop length in measures; overrides the settings file
    #[arg(long)]
    recording_interval: Option<u32>,
    #[arg(long, default_value = "lobby")]
    room: String,
    #[arg(long, default_value = "player")]
    name: String,
    /// Run without an audio device
    #[arg(long)]
    silent: bool,
    /// Output device name; the default device otherwise
    #[arg(long)]
    device: Option<String>,
    /// Substring of the MIDI input to listen to
    #[arg(long)]
    midi_port: Option<String>,
    /// List MIDI inputs and exit
    #[arg(long)]
    list_midi: bool,
    /// Base URL of the audio upload server
    #[arg(long)]
    upload_endpoint: Option<String>,
    /// Ogg file uploaded as the take when recording with the mic
    #[arg(long)]
    mic_file: Option<PathBuf>,
}

/// Room traffic going out from this client.
enum RoomRequest {
    Publish(Recording),
    ToggleMute(ParticipantId),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if cli.list_midi {
        for device in MidiBridge::list_inputs()? {
            println!("{}", device.name);
        }
        return Ok(());
    }

    let mut settings = match &cli.config {
        Some(path) => SessionSettings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => SessionSettings::default(),
    };
    if let Some(interval) = cli.recording_interval {
        settings.recording_interval = interval;
        settings.validate()?;
    }

    let backend: Arc<dyn AudioBackend> = if cli.silent {
        let output = NullOutput::new(StreamConfig::default());
        tokio::spawn(run_wall_clock(output.clone()));
        Arc::new(NullBackend::with_output(output))
    } else {
        Arc::new(CpalBackend::new(cli.device.clone()))
    };
    let loader = Arc::new(FileSampleLoader::new(settings.samples_dir.clone()));
    let participant = ParticipantId::new(cli.name.clone());
    let identity = SessionIdentity::new(participant.clone(), cli.room.clone(), cli.name.clone());

    let (commands_tx, commands_rx) = mpsc::channel(256);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let driver = SessionDriver::new(backend, loader, settings, identity, events_tx);
    let driver_task = tokio::spawn(driver.run(commands_rx));

    let room = LoopbackRoom::new(cli.room.clone());
    let client = RoomClient::join(room.connect(), cli.room.clone(), participant)
        .await
        .context("joining room")?;
    let (room_tx, room_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_room(client, room_rx, commands_tx.clone()));

    let mic: Option<Arc<dyn MicCapture>> = match (&cli.upload_endpoint, &cli.mic_file) {
        (Some(endpoint), Some(file)) => Some(Arc::new(FileMicCapture::new(
            file.clone(),
            AudioUploadClient::new(endpoint.clone()),
        ))),
        _ => None,
    };
    tokio::spawn(report_events(events_rx, room_tx.clone(), mic, commands_tx.clone()));

    let _midi = match &cli.midi_port {
        Some(port) => Some(MidiBridge::connect(port, commands_tx.clone())?),
        None => None,
    };

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match input::parse(&line, cli.bpm, cli.time_signature) {
            Ok(Input::Session(command)) => {
                if commands_tx.send(command).await.is_err() {
                    error!("session driver stopped");
                    break;
                }
            }
            Ok(Input::Mute(participant)) => {
                let _ = room_tx.send(RoomRequest::ToggleMute(participant));
            }
            Ok(Input::Help) => println!("{HELP}"),
            Ok(Input::Quit) => break,
            Err(message) => println!("{message}"),
        }
    }

    let _ = commands_tx.send(SessionCommand::Shutdown).await;
    driver_task.await??;
    Ok(())
}

/// Keeps a silent output's clock in step with wall time.
async fn run_wall_clock(output: NullOutput) {
    let started = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(5));
    loop {
        ticker.tick().await;
        output.set_time(started.elapsed().as_secs_f64());
    }
}

async fn run_room(
    mut client: RoomClient<LoopbackTransport>,
    mut requests: mpsc::UnboundedReceiver<RoomRequest>,
    commands: mpsc::Sender<SessionCommand>,
) {
    enum Wake {
        Snapshot(Result<RoommateRegistry, loopjam_services::ServiceError>),
        Request(Option<RoomRequest>),
    }

    loop {
        let wake = tokio::select! {
            snapshot = client.next_registry() => Wake::Snapshot(snapshot),
            request = requests.recv() => Wake::Request(request),
        };
        let registry = match wake {
            Wake::Snapshot(Ok(registry)) => registry,
            Wake::Snapshot(Err(err)) => {
                warn!(error = %err, "room update failed");
                continue;
            }
            Wake::Request(Some(RoomRequest::Publish(recording))) => {
                if let Err(err) = client.publish(recording).await {
                    warn!(error = %err, "could not publish recording");
                }
                continue;
            }
            Wake::Request(Some(RoomRequest::ToggleMute(participant))) => client.toggle_mute(&participant),
            Wake::Request(None) => break,
        };
        debug!(participants = registry.len(), "room snapshot");
        if commands.send(SessionCommand::Roommates(registry)).await.is_err() {
            break;
        }
    }
    if let Err(err) = client.leave().await {
        debug!(error = %err, "leaving room");
    }
}

async fn report_events(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    room: mpsc::UnboundedSender<RoomRequest>,
    mic: Option<Arc<dyn MicCapture>>,
    commands: mpsc::Sender<SessionCommand>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Status(text) => println!("{text}"),
            SessionEvent::Started { timing } => println!(
                "playing at {} bpm in {}, {:.2}s loop",
                timing.bpm,
                timing.time_signature,
                timing.loop_duration()
            ),
            SessionEvent::Stopped => println!("stopped"),
            SessionEvent::CaptureChanged(status) => info!(?status, "capture"),
            SessionEvent::RecordingShared(recording) => {
                println!("shared {} notes", recording.len());
                let _ = room.send(RoomRequest::Publish(recording));
            }
            SessionEvent::MicCaptureStarted => match &mic {
                Some(mic) => {
                    if let Err(err) = mic.start().await {
                        warn!(error = %err, "mic capture did not start");
                    }
                }
                None => println!("no mic configured; the take will stay a placeholder"),
            },
            SessionEvent::MicCaptureStopped { upload_name } => {
                if let Some(mic) = mic.clone() {
                    let commands = commands.clone();
                    tokio::spawn(async move {
                        match mic.stop(&upload_name).await {
                            Ok(id) => {
                                let _ = commands.send(SessionCommand::MicUploaded(id)).await;
                            }
                            Err(err) => warn!(error = %err, "mic upload failed"),
                        }
                    });
                }
            }
            SessionEvent::SessionLost { reason } => {
                println!("audio output lost ({reason}); type play to start again")
            }
            SessionEvent::Pulse { .. } | SessionEvent::LoopStarted { .. } => {}
        }
    }
}
