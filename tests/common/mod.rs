//! Shared helpers for integration tests.
//!
//! [`ScriptedBackend`] is a deterministic [`DecoderBackend`] whose signals,
//! seek outcomes, and dimension availability are fixed up front. Combined
//! with a paused Tokio clock it makes every retry and timeout path
//! reproducible.

#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use image::{DynamicImage, Rgb, RgbImage};
use snapframe::{
    CaptureState, DecoderBackend, DecoderSignal, DecoderState, MediaInput, ProgressCallback,
    ProgressInfo, Readiness, SignalReceiver, SnapError,
};
use tempfile::NamedTempFile;
use tokio::{
    sync::{
        mpsc::{UnboundedSender, unbounded_channel},
        oneshot,
    },
    time::Instant,
};

pub const MB: u64 = 1024 * 1024;

pub fn sample_video_path() -> &'static str {
    "tests/fixtures/sample_video.mp4"
}

pub fn has_sample_video() -> bool {
    Path::new(sample_video_path()).exists()
}

/// What the decoder does after a seek request.
#[derive(Debug, Clone)]
pub enum SeekOutcome {
    /// Signals `Seeked` and reports decoded data.
    Ready,
    /// Signals `Seeked` but never reports decoded data.
    NeverReady,
    /// Rejects the request outright.
    Reject,
    /// Reports a decode error instead of completing.
    Fail(String),
}

#[derive(Debug, Clone)]
pub struct Script {
    pub duration: Option<f64>,
    pub size: (u32, u32),
    /// Dimensions read as zero until this long after open. `None` never
    /// reports them.
    pub dimensions_after: Option<Duration>,
    pub on_open: Vec<DecoderSignal>,
    pub readiness_on_open: Readiness,
    /// Decoded data becomes available this long after open, whatever the
    /// seeks reported.
    pub decoded_after: Option<Duration>,
    /// Outcome per seek, in order. The last entry repeats.
    pub seeks: Vec<SeekOutcome>,
    pub presentation: bool,
    pub fail_open: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            duration: Some(10.0),
            size: (1280, 720),
            dimensions_after: Some(Duration::ZERO),
            on_open: vec![DecoderSignal::MetadataLoaded, DecoderSignal::DataLoaded],
            readiness_on_open: Readiness::DataDecoded,
            decoded_after: None,
            seeks: vec![SeekOutcome::Ready],
            presentation: false,
            fail_open: false,
        }
    }
}

impl Script {
    /// Metadata arrives but nothing is decoded until a seek completes.
    pub fn metadata_only() -> Self {
        Self {
            on_open: vec![DecoderSignal::MetadataLoaded],
            readiness_on_open: Readiness::Metadata,
            ..Self::default()
        }
    }
}

/// Observations shared between a backend and the test that owns it.
#[derive(Debug, Default)]
pub struct Tally {
    pub releases: AtomicUsize,
    pub frames: AtomicUsize,
    pub seeks: Mutex<Vec<Duration>>,
}

impl Tally {
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn seeks(&self) -> Vec<Duration> {
        self.seeks.lock().unwrap().clone()
    }
}

pub struct ScriptedBackend {
    script: Script,
    tally: Arc<Tally>,
    sender: Option<UnboundedSender<DecoderSignal>>,
    opened_at: Option<Instant>,
    readiness: Readiness,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> (Self, Arc<Tally>) {
        let tally = Arc::new(Tally::default());
        let backend = Self {
            script,
            tally: Arc::clone(&tally),
            sender: None,
            opened_at: None,
            readiness: Readiness::None,
        };
        (backend, tally)
    }

    fn dimensions(&self) -> (u32, u32) {
        let available = match (self.opened_at, self.script.dimensions_after) {
            (Some(opened_at), Some(after)) => opened_at.elapsed() >= after,
            _ => false,
        };
        if available { self.script.size } else { (0, 0) }
    }

    fn readiness(&self) -> Readiness {
        let decoded = match (self.opened_at, self.script.decoded_after) {
            (Some(opened_at), Some(after)) => opened_at.elapsed() >= after,
            _ => false,
        };
        if decoded { Readiness::DataDecoded } else { self.readiness }
    }
}

impl DecoderBackend for ScriptedBackend {
    fn open(&mut self, _input: &MediaInput) -> Result<SignalReceiver, SnapError> {
        if self.script.fail_open {
            return Err(SnapError::UnsupportedInput("scripted open failure".to_string()));
        }
        let (sender, receiver) = unbounded_channel();
        for signal in &self.script.on_open {
            let _ = sender.send(signal.clone());
        }
        self.sender = Some(sender);
        self.opened_at = Some(Instant::now());
        self.readiness = self.script.readiness_on_open;
        Ok(receiver)
    }

    fn snapshot(&self) -> DecoderState {
        let (width, height) = self.dimensions();
        DecoderState {
            readiness: self.readiness(),
            width,
            height,
            duration: self.script.duration,
            ..DecoderState::default()
        }
    }

    fn seek(&mut self, position: Duration) -> Result<(), SnapError> {
        let index = {
            let mut seeks = self.tally.seeks.lock().unwrap();
            seeks.push(position);
            seeks.len() - 1
        };
        let outcome = self
            .script
            .seeks
            .get(index)
            .or_else(|| self.script.seeks.last())
            .cloned()
            .unwrap_or(SeekOutcome::Ready);

        let Some(sender) = &self.sender else {
            return Err(SnapError::DecodeError("not open".to_string()));
        };
        match outcome {
            SeekOutcome::Ready => {
                self.readiness = Readiness::DataDecoded;
                let _ = sender.send(DecoderSignal::Seeked);
            }
            SeekOutcome::NeverReady => {
                self.readiness = Readiness::Metadata;
                let _ = sender.send(DecoderSignal::Seeked);
            }
            SeekOutcome::Reject => {
                return Err(SnapError::FfmpegError("seek rejected".to_string()));
            }
            SeekOutcome::Fail(message) => {
                let _ = sender.send(DecoderSignal::Error(message));
            }
        }
        Ok(())
    }

    fn frame(&self) -> Result<DynamicImage, SnapError> {
        self.tally.frames.fetch_add(1, Ordering::SeqCst);
        let (width, height) = self.dimensions();
        Ok(gradient(width, height))
    }

    fn request_frame_presentation(&mut self) -> Option<oneshot::Receiver<()>> {
        if !self.script.presentation {
            return None;
        }
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(());
        Some(receiver)
    }

    fn release(&mut self) {
        self.tally.releases.fetch_add(1, Ordering::SeqCst);
        self.sender = None;
    }
}

pub fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    }))
}

/// A small in-memory input.
pub fn small_input() -> MediaInput {
    MediaInput::from_bytes(vec![0_u8; 4096], "video/mp4")
}

/// A sparse file of `size` bytes, so large inputs cost no memory. Keep the
/// returned file alive for as long as the input is used.
pub fn input_of_size(size: u64) -> (NamedTempFile, MediaInput) {
    let file = tempfile::Builder::new()
        .suffix(".mp4")
        .tempfile()
        .expect("Failed to create temp file");
    file.as_file().set_len(size).expect("Failed to size temp file");
    let input = MediaInput::from_path(file.path()).expect("Failed to stat temp file");
    (file, input)
}

/// Records every stage reported through progress callbacks.
#[derive(Default)]
pub struct StageRecorder {
    stages: Mutex<Vec<CaptureState>>,
}

impl StageRecorder {
    pub fn stages(&self) -> Vec<CaptureState> {
        self.stages.lock().unwrap().clone()
    }
}

impl ProgressCallback for StageRecorder {
    fn on_progress(&self, info: &ProgressInfo) {
        self.stages.lock().unwrap().push(info.stage);
    }
}
