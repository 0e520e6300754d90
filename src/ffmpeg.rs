//! FFmpeg-backed decoder.
//!
//! [`FfmpegBackend`] implements [`DecoderBackend`] on top of `ffmpeg-next`.
//! All demuxing and decoding runs on a blocking worker owned by the
//! backend; the async side only reads a shared snapshot and receives
//! [`DecoderSignal`]s. In-memory inputs are spilled to a temporary file
//! first, which is removed when the worker shuts down.
//!
//! The module also exposes a thin wrapper over FFmpeg's own log level, so
//! callers can silence FFmpeg's stderr chatter without depending on
//! `ffmpeg-next` directly. Rust-side diagnostics go through the `log`
//! crate as usual.
//!
//! # Example
//!
//! ```no_run
//! use snapframe::{ExtractOptions, FfmpegLogLevel, MediaInput};
//!
//! # async fn example() -> Result<(), snapframe::SnapError> {
//! snapframe::set_ffmpeg_log_level(FfmpegLogLevel::Error);
//!
//! let input = MediaInput::from_path("clip.mp4")?;
//! let result = snapframe::extract_frames(&input, &ExtractOptions::new()).await?;
//! println!("preview: {} bytes", result.preview.len());
//! # Ok(())
//! # }
//! ```

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        mpsc::{Receiver, Sender, channel},
    },
    time::Duration,
};

use ffmpeg_next::{
    Rational,
    codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder,
    format::{Pixel, context::Input},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
    util::log::Level,
};
use image::{DynamicImage, RgbImage};
use tempfile::TempPath;
use tokio::sync::{
    mpsc::{UnboundedSender, unbounded_channel},
    oneshot,
};

use crate::{
    decoder::{DecoderBackend, DecoderSignal, DecoderState, Readiness, SignalReceiver},
    error::SnapError,
    input::{MediaInput, MediaSource},
};

enum Command {
    /// Target position and the seek generation it belongs to.
    Seek(Duration, u64),
    Shutdown,
}

#[derive(Default)]
struct Shared {
    state: DecoderState,
    picture: Option<DynamicImage>,
    presentations: Vec<oneshot::Sender<()>>,
    /// Bumped on every seek request; pictures decoded for an older
    /// generation are stale.
    generation: u64,
}

impl Shared {
    /// Drop the current picture and start a new seek generation.
    fn begin_seek(&mut self) -> u64 {
        self.generation += 1;
        if self.state.readiness > Readiness::Metadata {
            self.state.readiness = Readiness::Metadata;
        }
        self.picture = None;
        self.generation
    }

    /// Publish a decoded picture. Returns `false` if a newer seek was
    /// requested while it was being decoded.
    fn present(&mut self, generation: u64, picture: DynamicImage, position: Duration) -> bool {
        if generation != self.generation {
            log::trace!("Dropping picture from seek generation {generation}");
            return false;
        }
        self.state.width = picture.width();
        self.state.height = picture.height();
        self.state.position = position;
        self.state.readiness = Readiness::DataDecoded;
        self.picture = Some(picture);
        for waiter in self.presentations.drain(..) {
            let _ = waiter.send(());
        }
        true
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A [`DecoderBackend`] that decodes with FFmpeg on a blocking worker.
#[derive(Default)]
pub struct FfmpegBackend {
    shared: Arc<Mutex<Shared>>,
    commands: Option<Sender<Command>>,
}

impl FfmpegBackend {
    /// Create an idle backend. Nothing is opened until
    /// [`DecoderBackend::open`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl DecoderBackend for FfmpegBackend {
    fn open(&mut self, input: &MediaInput) -> Result<SignalReceiver, SnapError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|error| {
            SnapError::FfmpegError(format!("decoder worker needs a Tokio runtime: {error}"))
        })?;

        let (path, spill) = match input.source() {
            MediaSource::File(path) => (path.clone(), None),
            MediaSource::Memory(bytes) => {
                let spill = spill_to_disk(bytes, &input.extension_hint())?;
                (spill.to_path_buf(), Some(spill))
            }
        };

        let (signals, receiver) = unbounded_channel();
        let (commands, command_receiver) = channel();
        let shared = Arc::clone(&self.shared);

        log::debug!("Starting decoder worker for {}", path.display());
        runtime.spawn_blocking(move || {
            let worker = Worker {
                shared,
                signals,
                commands: command_receiver,
            };
            worker.run(&path);
            // The input is closed by now, so the spill can be removed.
            drop(spill);
        });

        self.commands = Some(commands);
        Ok(receiver)
    }

    fn snapshot(&self) -> DecoderState {
        lock(&self.shared).state.clone()
    }

    fn seek(&mut self, position: Duration) -> Result<(), SnapError> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| SnapError::DecodeError("decoder is not open".to_string()))?;
        let generation = lock(&self.shared).begin_seek();
        commands
            .send(Command::Seek(position, generation))
            .map_err(|_| SnapError::DecodeError("decoder worker has stopped".to_string()))
    }

    fn frame(&self) -> Result<DynamicImage, SnapError> {
        lock(&self.shared).picture.clone().ok_or_else(|| {
            SnapError::RasterizationUnavailable("no decoded picture available".to_string())
        })
    }

    fn request_frame_presentation(&mut self) -> Option<oneshot::Receiver<()>> {
        let (sender, receiver) = oneshot::channel();
        let mut shared = lock(&self.shared);
        if shared.state.readiness == Readiness::DataDecoded && shared.picture.is_some() {
            let _ = sender.send(());
        } else {
            shared.presentations.push(sender);
        }
        Some(receiver)
    }

    fn release(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Shutdown);
        }
        let mut shared = lock(&self.shared);
        shared.picture = None;
        shared.presentations.clear();
    }
}

fn spill_to_disk(bytes: &[u8], extension: &str) -> Result<TempPath, SnapError> {
    let mut file = tempfile::Builder::new()
        .prefix("snapframe-")
        .suffix(extension)
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file.into_temp_path())
}

struct Worker {
    shared: Arc<Mutex<Shared>>,
    signals: UnboundedSender<DecoderSignal>,
    commands: Receiver<Command>,
}

impl Worker {
    fn run(&self, path: &Path) {
        if let Err(error) = self.decode(path) {
            log::warn!("Decoder worker failed: {error}");
            let message = error.to_string();
            lock(&self.shared).state.last_error = Some(message.clone());
            self.signal(DecoderSignal::Error(message));
        }
        log::debug!("Decoder worker stopped");
    }

    fn signal(&self, signal: DecoderSignal) {
        // The session may already be gone.
        let _ = self.signals.send(signal);
    }

    fn decode(&self, path: &Path) -> Result<(), SnapError> {
        let open_error = |reason: String| SnapError::FileOpen {
            path: PathBuf::from(path),
            reason,
        };
        ffmpeg_next::init()
            .map_err(|error| open_error(format!("FFmpeg initialisation failed: {error}")))?;
        let mut input =
            ffmpeg_next::format::input(&path).map_err(|error| open_error(error.to_string()))?;

        let stream = input
            .streams()
            .best(Type::Video)
            .ok_or_else(|| SnapError::UnsupportedInput("no video stream found".to_string()))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let stream_duration = stream.duration();
        let context = CodecContext::from_parameters(stream.parameters())?;
        let mut decoder = context.decoder().video()?;

        let duration = container_duration(input.duration())
            .or_else(|| stream_seconds(stream_duration, time_base).filter(|s| *s > 0.0));
        {
            let mut shared = lock(&self.shared);
            shared.state.readiness = Readiness::Metadata;
            shared.state.width = decoder.width();
            shared.state.height = decoder.height();
            shared.state.duration = duration;
        }
        log::debug!(
            "Video stream {stream_index}: {}x{}, duration={duration:?}",
            decoder.width(),
            decoder.height()
        );
        self.signal(DecoderSignal::MetadataLoaded);

        let mut stream = PictureStream {
            input: &mut input,
            decoder: &mut decoder,
            stream_index,
            time_base,
        };

        match stream.picture_at(None)? {
            Some((picture, position)) => {
                if lock(&self.shared).present(0, picture, position) {
                    self.signal(DecoderSignal::DataLoaded);
                    self.signal(DecoderSignal::CanPlay);
                }
            }
            None => log::warn!("No picture decoded from the start of the stream"),
        }

        loop {
            match self.commands.recv() {
                Ok(Command::Seek(target, generation)) => {
                    match stream.picture_at(Some(target))? {
                        Some((picture, position)) => {
                            lock(&self.shared).present(generation, picture, position);
                        }
                        None => log::debug!("Seek to {target:?} produced no picture"),
                    }
                    self.signal(DecoderSignal::Seeked);
                }
                Ok(Command::Shutdown) | Err(_) => return Ok(()),
            }
        }
    }
}

/// Demuxer plus decoder for the selected video stream.
struct PictureStream<'a> {
    input: &'a mut Input,
    decoder: &'a mut VideoDecoder,
    stream_index: usize,
    time_base: Rational,
}

impl PictureStream<'_> {
    /// Decode the first picture at or after `target`, or the first picture
    /// of the stream when `target` is `None`.
    ///
    /// Falls back to the last picture decoded when the stream ends before
    /// reaching `target`.
    fn picture_at(
        &mut self,
        target: Option<Duration>,
    ) -> Result<Option<(DynamicImage, Duration)>, SnapError> {
        if let Some(target) = target {
            let timestamp = target.as_micros() as i64;
            self.input.seek(timestamp, ..timestamp)?;
            self.decoder.flush();
        }
        let wanted = target.unwrap_or(Duration::ZERO);

        let mut decoded = VideoFrame::empty();
        // Most recent picture before `target`.
        let mut last = VideoFrame::empty();

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder.send_packet(&packet)?;
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let position = position_of(&decoded, self.time_base);
                if target.is_none() || position >= wanted {
                    return Ok(Some((to_image(&decoded)?, position)));
                }
                std::mem::swap(&mut decoded, &mut last);
            }
        }

        self.decoder.send_eof()?;
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let position = position_of(&decoded, self.time_base);
            if position >= wanted {
                return Ok(Some((to_image(&decoded)?, position)));
            }
            std::mem::swap(&mut decoded, &mut last);
        }

        if last.is_empty() {
            return Ok(None);
        }
        let position = position_of(&last, self.time_base);
        Ok(Some((to_image(&last)?, position)))
    }
}

fn position_of(frame: &VideoFrame, time_base: Rational) -> Duration {
    frame
        .timestamp()
        .or_else(|| frame.pts())
        .and_then(|pts| stream_seconds(pts, time_base))
        .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
        .unwrap_or_default()
}

fn container_duration(microseconds: i64) -> Option<f64> {
    (microseconds > 0).then(|| microseconds as f64 / 1_000_000.0)
}

fn stream_seconds(value: i64, time_base: Rational) -> Option<f64> {
    if time_base.denominator() == 0 || value < 0 {
        return None;
    }
    Some(value as f64 * time_base.numerator() as f64 / time_base.denominator() as f64)
}

/// Convert a decoded picture of any pixel format to an RGB image.
fn to_image(frame: &VideoFrame) -> Result<DynamicImage, SnapError> {
    let (width, height) = (frame.width(), frame.height());
    let mut scaler = ScalingContext::get(
        frame.format(),
        width,
        height,
        Pixel::RGB24,
        width,
        height,
        ScalingFlags::BILINEAR,
    )?;
    let mut rgb = VideoFrame::empty();
    scaler.run(frame, &mut rgb)?;

    let row = width as usize * 3;
    let stride = rgb.stride(0);
    let data = rgb.data(0);
    let buffer = if stride == row {
        data[..row * height as usize].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row * height as usize);
        for line in data.chunks(stride).take(height as usize) {
            buffer.extend_from_slice(&line[..row]);
        }
        buffer
    };

    RgbImage::from_raw(width, height, buffer)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| {
            SnapError::RasterizationUnavailable(
                "decoded picture does not match its dimensions".to_string(),
            )
        })
}

/// FFmpeg internal log verbosity, most verbose last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// No output at all.
    Quiet,
    /// Unrecoverable conditions that abort the process.
    Panic,
    /// Unrecoverable errors.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings (FFmpeg's default).
    Warning,
    /// Informational messages.
    Info,
    /// Verbose informational messages.
    Verbose,
    /// Debugging messages.
    Debug,
    /// Everything.
    Trace,
}

impl From<FfmpegLogLevel> for Level {
    fn from(level: FfmpegLogLevel) -> Self {
        match level {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Panic => Level::Panic,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Verbose => Level::Verbose,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }
}

impl From<Level> for FfmpegLogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Quiet => FfmpegLogLevel::Quiet,
            Level::Panic => FfmpegLogLevel::Panic,
            Level::Fatal => FfmpegLogLevel::Fatal,
            Level::Error => FfmpegLogLevel::Error,
            Level::Warning => FfmpegLogLevel::Warning,
            Level::Info => FfmpegLogLevel::Info,
            Level::Verbose => FfmpegLogLevel::Verbose,
            Level::Debug => FfmpegLogLevel::Debug,
            Level::Trace => FfmpegLogLevel::Trace,
        }
    }
}

/// Set FFmpeg's own stderr verbosity. Does not affect `log` output.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.into());
}

/// Current FFmpeg verbosity, if it maps to a known level.
pub fn get_ffmpeg_log_level() -> Option<FfmpegLogLevel> {
    ffmpeg_next::util::log::get_level().ok().map(FfmpegLogLevel::from)
}
