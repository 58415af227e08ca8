use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use tracing::{debug, error, info};

use crate::backend::{AudioBackend, AudioOutput, StreamConfig, VoiceId, VoiceRequest, VoiceSource};
use crate::dsp::{sample_at, tone_sample};
use crate::error::AudioError;

const COMMAND_CAPACITY: usize = 1024;

static OUTPUT_OPEN: AtomicBool = AtomicBool::new(false);

/// Held while a device output exists; one per process.
struct OutputClaim;

impl OutputClaim {
    fn acquire() -> Result<Self, AudioError> {
        OUTPUT_OPEN
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| OutputClaim)
            .map_err(|_| AudioError::DeviceBusy)
    }
}

impl Drop for OutputClaim {
    fn drop(&mut self) {
        OUTPUT_OPEN.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
enum VoiceCommand {
    Start {
        id: VoiceId,
        source: VoiceSource,
        start_frame: u64,
        stop_frame: Option<u64>,
        gain: f32,
    },
    Stop {
        id: VoiceId,
        at_frame: Option<u64>,
    },
}

struct LiveVoice {
    id: VoiceId,
    source: VoiceSource,
    start_frame: u64,
    stop_frame: Option<u64>,
    gain: f32,
}

impl LiveVoice {
    /// Contribution at `frame`, or `None` once the voice is done.
    fn render(&self, frame: u64, sample_rate: f64) -> Option<f32> {
        if matches!(self.stop_frame, Some(stop) if frame >= stop) {
            return None;
        }
        if frame < self.start_frame {
            return Some(0.0);
        }
        let elapsed = (frame - self.start_frame) as f64 / sample_rate;
        match &self.source {
            VoiceSource::Tone { frequency } => Some(tone_sample(*frequency, elapsed) * self.gain),
            VoiceSource::Sample(sample) => sample_at(sample, elapsed).map(|value| value * self.gain),
        }
    }
}

/// Mixes scheduled voices frame by frame. Lives inside the stream callback.
struct StreamMixer {
    sample_rate: f64,
    frame: u64,
    voices: Vec<LiveVoice>,
}

impl StreamMixer {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f64,
            frame: 0,
            voices: Vec::new(),
        }
    }

    fn apply(&mut self, command: VoiceCommand) {
        match command {
            VoiceCommand::Start {
                id,
                source,
                start_frame,
                stop_frame,
                gain,
            } => self.voices.push(LiveVoice {
                id,
                source,
                start_frame: start_frame.max(self.frame),
                stop_frame,
                gain,
            }),
            VoiceCommand::Stop { id, at_frame } => {
                let at = at_frame.unwrap_or(self.frame).max(self.frame);
                if let Some(voice) = self.voices.iter_mut().find(|voice| voice.id == id) {
                    voice.stop_frame = Some(voice.stop_frame.map_or(at, |stop| stop.min(at)));
                }
            }
        }
    }

    fn next_frame(&mut self) -> f32 {
        let frame = self.frame;
        let sample_rate = self.sample_rate;
        let mut mix = 0.0;
        self.voices.retain(|voice| match voice.render(frame, sample_rate) {
            Some(value) => {
                mix += value;
                true
            }
            None => false,
        });
        self.frame += 1;
        mix.clamp(-1.0, 1.0)
    }
}

fn to_frame(seconds: f64, sample_rate: u32) -> u64 {
    (seconds.max(0.0) * sample_rate as f64).round() as u64
}

/// Opens the system's output device through cpal.
#[derive(Clone, Debug, Default)]
pub struct CpalBackend {
    device_name: Option<String>,
}

impl CpalBackend {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl AudioBackend for CpalBackend {
    fn open_output(&self, config: &StreamConfig) -> Result<Box<dyn AudioOutput>, AudioError> {
        Ok(Box::new(CpalOutput::open(self.device_name.clone(), config)?))
    }
}

/// A running cpal stream. The stream itself stays on its own thread;
/// this handle talks to the callback through a lock-free queue.
pub struct CpalOutput {
    config: StreamConfig,
    commands: HeapProducer<VoiceCommand>,
    frames: Arc<AtomicU64>,
    failure: Arc<Mutex<Option<String>>>,
    next_id: u64,
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    _claim: OutputClaim,
}

impl CpalOutput {
    pub fn open(device_name: Option<String>, requested: &StreamConfig) -> Result<Self, AudioError> {
        let claim = OutputClaim::acquire()?;
        let (producer, consumer) = HeapRb::<VoiceCommand>::new(COMMAND_CAPACITY).split();
        let frames = Arc::new(AtomicU64::new(0));
        let failure = Arc::new(Mutex::new(None));
        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread_frames = frames.clone();
        let thread_failure = failure.clone();
        let requested = *requested;
        let thread = thread::Builder::new()
            .name("loopjam-output".into())
            .spawn(move || {
                let opened = build_stream(
                    device_name.as_deref(),
                    &requested,
                    consumer,
                    thread_frames,
                    thread_failure,
                )
                .and_then(|(stream, config)| {
                    stream
                        .play()
                        .map_err(|err| AudioError::Stream(err.to_string()))?;
                    Ok((stream, config))
                });
                match opened {
                    Ok((stream, config)) => {
                        let _ = ready_tx.send(Ok(config));
                        let _ = shutdown_rx.recv();
                        drop(stream);
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })
            .map_err(|err| AudioError::Stream(err.to_string()))?;

        let config = ready_rx
            .recv()
            .map_err(|_| AudioError::Stream("output thread exited early".into()))??;
        info!(?config, "audio output open");
        Ok(Self {
            config,
            commands: producer,
            frames,
            failure,
            next_id: 0,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
            _claim: claim,
        })
    }

    fn check(&self) -> Result<(), AudioError> {
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match failure.as_ref() {
            Some(reason) => Err(AudioError::DeviceLost(reason.clone())),
            None => Ok(()),
        }
    }

    fn send(&mut self, command: VoiceCommand) -> Result<(), AudioError> {
        self.commands
            .push(command)
            .map_err(|_| AudioError::Stream("voice command queue full".into()))
    }
}

impl AudioOutput for CpalOutput {
    fn config(&self) -> StreamConfig {
        self.config
    }

    fn current_time(&self) -> Result<f64, AudioError> {
        self.check()?;
        Ok(self.frames.load(Ordering::Acquire) as f64 / self.config.sample_rate as f64)
    }

    fn start_voice(&mut self, request: VoiceRequest) -> Result<VoiceId, AudioError> {
        self.check()?;
        self.next_id += 1;
        let id = VoiceId(self.next_id);
        let sample_rate = self.config.sample_rate;
        self.send(VoiceCommand::Start {
            id,
            source: request.source,
            start_frame: to_frame(request.start, sample_rate),
            stop_frame: request.stop.map(|stop| to_frame(stop, sample_rate)),
            gain: request.gain,
        })?;
        Ok(id)
    }

    fn stop_voice(&mut self, id: VoiceId, at: Option<f64>) -> Result<(), AudioError> {
        self.check()?;
        let sample_rate = self.config.sample_rate;
        self.send(VoiceCommand::Stop {
            id,
            at_frame: at.map(|at| to_frame(at, sample_rate)),
        })
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!("audio output released");
    }
}

fn find_output_device(host: &cpal::Host, name: Option<&str>) -> Option<cpal::Device> {
    match name {
        Some(target) => host
            .output_devices()
            .ok()?
            .find(|device| device.name().map(|n| n == target).unwrap_or(false)),
        None => host.default_output_device(),
    }
}

fn build_stream(
    device_name: Option<&str>,
    requested: &StreamConfig,
    commands: HeapConsumer<VoiceCommand>,
    frames: Arc<AtomicU64>,
    failure: Arc<Mutex<Option<String>>>,
) -> Result<(cpal::Stream, StreamConfig), AudioError> {
    let host = cpal::default_host();
    let device = find_output_device(&host, device_name).ok_or(AudioError::NoDevice)?;
    let supported = device
        .default_output_config()
        .map_err(|err| AudioError::Stream(err.to_string()))?;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();
    let config = StreamConfig {
        sample_rate: stream_config.sample_rate.0,
        channels: stream_config.channels,
        buffer_size: requested.buffer_size,
    };
    let stream = match sample_format {
        cpal::SampleFormat::F32 => run::<f32>(&device, &stream_config, commands, frames, failure),
        cpal::SampleFormat::I16 => run::<i16>(&device, &stream_config, commands, frames, failure),
        cpal::SampleFormat::U16 => run::<u16>(&device, &stream_config, commands, frames, failure),
        other => Err(AudioError::UnsupportedFormat(format!("{other:?}"))),
    }?;
    Ok((stream, config))
}

fn run<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut commands: HeapConsumer<VoiceCommand>,
    frames: Arc<AtomicU64>,
    failure: Arc<Mutex<Option<String>>>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut mixer = StreamMixer::new(config.sample_rate.0);
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                while let Some(command) = commands.pop() {
                    mixer.apply(command);
                }
                for frame in data.chunks_mut(channels) {
                    let value = T::from_sample(mixer.next_frame());
                    for slot in frame.iter_mut() {
                        *slot = value;
                    }
                }
                frames.store(mixer.frame, Ordering::Release);
            },
            move |err| {
                error!(%err, "audio stream failed");
                let mut slot = failure.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                slot.get_or_insert_with(|| err.to_string());
            },
            None,
        )
        .map_err(|err| AudioError::Stream(err.to_string()))
}
