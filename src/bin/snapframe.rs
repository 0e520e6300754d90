use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde_json::{Value, json};
use snapframe::{
    CapturePolicy, CaptureState, CaptureTuning, ExtractOptions, ExtractionResult, FfmpegLogLevel,
    MediaInput, ProgressCallback, ProgressInfo, SnapError,
};

const CLI_AFTER_HELP: &str = "Examples:\n  snapframe extract clip.mp4 --out frames\n  snapframe --progress extract a.mov b.webm --out frames --json\n  snapframe policy 250MB\n  snapframe completions zsh > _snapframe";

#[derive(Debug, Parser)]
#[command(
    name = "snapframe",
    version,
    about = "Capture a representative frame from video files",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging output.
    #[arg(long)]
    verbose: bool,

    /// Show a spinner per input while extracting.
    #[arg(long)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long)]
    overwrite: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract preview and API rasters from one or more videos.
    #[command(
        about = "Extract a frame from each input",
        after_help = "Examples:\n  snapframe extract clip.mp4 --out frames\n  snapframe extract raw.bin --mime-type video/mp4 --out frames --timeout 1:30\n  snapframe --progress extract a.mp4 b.mp4 --out frames"
    )]
    Extract {
        /// Input video paths.
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
        /// Output directory for `<stem>.preview.jpg` and `<stem>.api.jpg`.
        #[arg(long)]
        out: PathBuf,
        /// Print a machine-readable JSON report.
        #[arg(long)]
        json: bool,
        /// Declared MIME type, for inputs whose extension is not recognised.
        #[arg(long)]
        mime_type: Option<String>,
        /// Fixed timeout per input (seconds or mm:ss) instead of the size-derived one.
        #[arg(long)]
        timeout: Option<String>,
    },

    /// Print the capture policy for an input size.
    #[command(
        about = "Show the capture policy for a size",
        after_help = "Examples:\n  snapframe policy 12MB\n  snapframe policy 734003200 --json"
    )]
    Policy {
        /// Input size in bytes, or with a KB/MB/GB suffix.
        size: String,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_size(value: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let trimmed = value.trim();
    let upper = trimmed.to_ascii_uppercase();
    let (number, multiplier) = [
        ("GB", 1024_u64.pow(3)),
        ("MB", 1024_u64.pow(2)),
        ("KB", 1024_u64),
        ("B", 1_u64),
    ]
    .iter()
    .find_map(|(suffix, multiplier)| {
        upper
            .strip_suffix(suffix)
            .map(|number| (number.trim().to_string(), *multiplier))
    })
    .unwrap_or((upper.clone(), 1));

    let amount = number
        .parse::<f64>()
        .map_err(|_| format!("invalid size: {trimmed}"))?;
    if !amount.is_finite() || amount < 0.0 {
        return Err(format!("invalid size: {trimmed}").into());
    }
    Ok((amount * multiplier as f64) as u64)
}

fn parse_timecode(value: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("time value cannot be empty".into());
    }

    if let Ok(seconds) = trimmed.parse::<f64>() {
        return seconds_to_duration(seconds, trimmed);
    }

    let parts: Vec<&str> = trimmed.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(format!("invalid time format: {trimmed}").into());
    }

    let (hours, minutes, seconds) = if parts.len() == 3 {
        (parts[0].parse::<u64>()?, parts[1].parse::<u64>()?, parts[2])
    } else {
        (0_u64, parts[0].parse::<u64>()?, parts[1])
    };

    let seconds = seconds.parse::<f64>()?;
    let total = (hours as f64 * 3600.0) + (minutes as f64 * 60.0) + seconds;
    seconds_to_duration(total, trimmed)
}

fn seconds_to_duration(seconds: f64, original: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    Duration::try_from_secs_f64(seconds.max(0.0))
        .map_err(|error| format!("time value out of range: {original} ({error})").into())
}

fn parse_log_level(value: &str) -> Option<FfmpegLogLevel> {
    match value.to_ascii_lowercase().as_str() {
        "quiet" => Some(FfmpegLogLevel::Quiet),
        "panic" => Some(FfmpegLogLevel::Panic),
        "fatal" => Some(FfmpegLogLevel::Fatal),
        "error" => Some(FfmpegLogLevel::Error),
        "warning" | "warn" => Some(FfmpegLogLevel::Warning),
        "info" => Some(FfmpegLogLevel::Info),
        "verbose" => Some(FfmpegLogLevel::Verbose),
        "debug" => Some(FfmpegLogLevel::Debug),
        "trace" => Some(FfmpegLogLevel::Trace),
        _ => None,
    }
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

/// Output paths for every input, rejecting inputs that would write the
/// same files.
fn plan_outputs(out: &Path, inputs: &[PathBuf]) -> Result<Vec<(PathBuf, PathBuf)>, String> {
    let mut claimed: HashMap<PathBuf, &Path> = HashMap::with_capacity(inputs.len());
    let mut planned = Vec::with_capacity(inputs.len());
    for input in inputs {
        let paths = output_paths(out, input);
        if let Some(previous) = claimed.insert(paths.0.clone(), input.as_path()) {
            return Err(format!(
                "{} and {} would both write {}",
                previous.display(),
                input.display(),
                paths.0.display()
            ));
        }
        planned.push(paths);
    }
    Ok(planned)
}

/// Write both rasters, turning a write failure into a failed outcome.
fn save_outcome(
    outcome: Result<ExtractionResult, SnapError>,
    paths: &(PathBuf, PathBuf),
) -> Result<ExtractionResult, SnapError> {
    let result = outcome?;
    result.preview.save(&paths.0)?;
    result.api.save(&paths.1)?;
    Ok(result)
}

fn output_paths(out: &Path, input: &Path) -> (PathBuf, PathBuf) {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".to_string());
    (
        out.join(format!("{stem}.preview.jpg")),
        out.join(format!("{stem}.api.jpg")),
    )
}

fn describe(stage: CaptureState) -> String {
    match stage {
        CaptureState::Init => "starting".to_string(),
        CaptureState::AwaitMetadata => "waiting for metadata".to_string(),
        CaptureState::Seeking { anchor } => format!("seeking to anchor {anchor}"),
        CaptureState::AwaitSeekStable { anchor: Some(anchor) } => {
            format!("settling at anchor {anchor}")
        }
        CaptureState::AwaitSeekStable { anchor: None } => "settling".to_string(),
        CaptureState::Capturing => "capturing".to_string(),
        CaptureState::Done => "done".to_string(),
        CaptureState::Failed => "failed".to_string(),
    }
}

struct TerminalProgress {
    bar: ProgressBar,
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.bar.set_message(describe(info.stage));
        self.bar.tick();
    }
}

fn spinner(multi: &MultiProgress, label: &str) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let bar = multi.add(ProgressBar::new_spinner());
    bar.set_style(ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold} {msg} [{elapsed}]")?);
    bar.set_prefix(label.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    Ok(bar)
}

fn report_json(input: &Path, outcome: &Result<ExtractionResult, SnapError>, paths: &(PathBuf, PathBuf)) -> Value {
    match outcome {
        Ok(result) => json!({
            "input": input.display().to_string(),
            "status": "ok",
            "preview": {
                "path": paths.0.display().to_string(),
                "width": result.preview.width,
                "height": result.preview.height,
                "bytes": result.preview.len(),
            },
            "api": {
                "path": paths.1.display().to_string(),
                "width": result.api.width,
                "height": result.api.height,
                "bytes": result.api.len(),
            },
            "anchor": result.anchor,
            "position_seconds": result.position.as_secs_f64(),
            "elapsed_seconds": result.elapsed.as_secs_f64(),
        }),
        Err(error) => json!({
            "input": input.display().to_string(),
            "status": "error",
            "kind": error.kind(),
            "error": error.to_string(),
        }),
    }
}

async fn extract(
    global: &GlobalOptions,
    inputs: Vec<PathBuf>,
    out: PathBuf,
    json_output: bool,
    mime_type: Option<String>,
    timeout: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let timeout = timeout.as_deref().map(parse_timecode).transpose()?;
    fs::create_dir_all(&out)?;

    let planned = plan_outputs(&out, &inputs)?;

    let multi = MultiProgress::new();
    let mut handles = Vec::with_capacity(inputs.len());
    for (path, paths) in inputs.into_iter().zip(planned) {
        ensure_writable_path(&paths.0, global.overwrite)?;
        ensure_writable_path(&paths.1, global.overwrite)?;

        let mut input = MediaInput::from_path(&path)?;
        if let Some(mime_type) = &mime_type {
            input = input.with_mime_type(mime_type.clone());
        }

        let mut options = ExtractOptions::new();
        if let Some(budget) = timeout {
            options = options.with_timeout_budget(budget);
        }
        let bar = if global.progress {
            let label = input.name().unwrap_or("input").to_string();
            let bar = spinner(&multi, &label)?;
            options = options.with_progress(Arc::new(TerminalProgress { bar: bar.clone() }));
            Some(bar)
        } else {
            None
        };

        log::debug!("Queued {}", path.display());
        handles.push(tokio::spawn(async move {
            let outcome = snapframe::extract_frames(&input, &options).await;
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
            (path, paths, outcome)
        }));
    }

    let mut reports = Vec::with_capacity(handles.len());
    let mut failures = 0_usize;
    for handle in handles {
        let (path, paths, outcome) = handle.await?;
        let outcome = save_outcome(outcome, &paths);

        if json_output {
            reports.push(report_json(&path, &outcome, &paths));
        }
        match &outcome {
            Ok(result) if !json_output => println!(
                "{} {} -> {} ({}x{}), {} ({}x{}) at {:.2}s in {:.2}s",
                "ok".green().bold(),
                path.display(),
                paths.0.display(),
                result.preview.width,
                result.preview.height,
                paths.1.display(),
                result.api.width,
                result.api.height,
                result.position.as_secs_f64(),
                result.elapsed.as_secs_f64(),
            ),
            Ok(_) => {}
            Err(error) => {
                failures += 1;
                if !json_output {
                    eprintln!(
                        "{} {}: {}",
                        "failed".red().bold(),
                        path.display(),
                        error
                    );
                }
            }
        }
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    if failures > 0 {
        return Err(format!("{failures} input(s) failed").into());
    }
    Ok(())
}

fn show_policy(size: &str, json_output: bool) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = parse_size(size)?;
    let policy = CapturePolicy::for_size(bytes, &CaptureTuning::default());
    let backoff: Vec<f64> = (1..=policy.dimension_retry_limit())
        .map(|retry| policy.dimension_backoff(retry).as_secs_f64())
        .collect();

    if json_output {
        let payload = json!({
            "size_bytes": bytes,
            "large_input": policy.is_large_input(),
            "timeout_seconds": policy.timeout_budget().as_secs_f64(),
            "anchors": policy.anchors(),
            "seek_settle_ms": policy.seek_settle().as_millis() as u64,
            "seek_poll_limit": policy.seek_poll_limit(),
            "seek_poll_interval_ms": policy.seek_poll_interval().as_millis() as u64,
            "dimension_backoff_seconds": backoff,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Size: {bytes} bytes");
        println!("Large input: {}", policy.is_large_input());
        println!("Timeout: {:?}", policy.timeout_budget());
        println!("Anchors: {:?}", policy.anchors());
        println!(
            "Seek: settle {:?}, {} polls every {:?}",
            policy.seek_settle(),
            policy.seek_poll_limit(),
            policy.seek_poll_interval()
        );
        println!(
            "Dimension retries: {} (backoff {:?} .. {:?})",
            policy.dimension_retry_limit(),
            policy.dimension_backoff(1),
            policy.dimension_backoff(policy.dimension_retry_limit())
        );
    }
    Ok(())
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    let default_filter = if global.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Some(level) = &global.log_level {
        let parsed = parse_log_level(level).ok_or(format!("unsupported --log-level: {level}"))?;
        snapframe::set_ffmpeg_log_level(parsed);
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Extract {
            inputs,
            out,
            json,
            mime_type,
            timeout,
        } => extract(&cli.global, inputs, out, json, mime_type, timeout).await?,
        Commands::Policy { size, json } => show_policy(&size, json)?,
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "snapframe", &mut std::io::stdout());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
