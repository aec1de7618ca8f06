use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mlog_video::config::{load_or_create_config, ConfigLoadOptions, SessionConfig, DEFAULT_CONFIG_FILE};
use mlog_video::decoding::{FfmpegDecoder, RawFrameReader};
use mlog_video::encoding::{
    format_clock, transcode, FfmpegMode, FfmpegTools, IntermediateFile, TranscodeTarget,
};
use mlog_video::error_codes::{envelope_for, exit_code_for, CodedError};
use mlog_video::pipeline::{encode_frames, EncodeObserver, EncodeSummary};
use mlog_video::probe;
use mlog_video::verify::verify_output;

const FRAME_REPORT_EVERY: usize = 100;
const BLOCK_REPORT_INTERVAL: Duration = Duration::from_millis(100);
const TRANSCODE_REPORT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(name = "mlog-video")]
#[command(about = "Encode a video into mlog block files")]
struct Cli {
    /// Print results and errors as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Transcode, quantize and write block files for a video.
    Encode {
        video: PathBuf,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Override the configured output directory.
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        #[arg(long)]
        regen_id: bool,
        #[arg(long)]
        keep_intermediate: bool,
        #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
        ffmpeg: ModeArg,
    },
    /// Encode an already decoded rgb24 stream at the configured size.
    Raw {
        input: PathBuf,
        /// Display name for the header block. Defaults to the file stem.
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Load (or create) the configuration and print it.
    Config {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        #[arg(long)]
        regen_id: bool,
    },
    /// Validate a directory of block files against its count file.
    Check { dir: PathBuf },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Auto,
    System,
    Sidecar,
}

impl From<ModeArg> for FfmpegMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Auto => Self::Auto,
            ModeArg::System => Self::System,
            ModeArg::Sidecar => Self::Sidecar,
        }
    }
}

fn main() -> ExitCode {
    init_tracing();

    let matches = Cli::command().version(version_string()).get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|error| error.exit());
    let json = cli.json;

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if json {
                match serde_json::to_string_pretty(&envelope_for(&error)) {
                    Ok(body) => println!("{body}"),
                    Err(serialize_error) => error!(%serialize_error, "failed to serialize error"),
                }
            }
            error!("{error:#}");
            exit_code_for(&error)
        }
    }
}

fn init_tracing() {
    // RUST_LOG=mlog_video=debug shows ffmpeg command lines.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

fn version_string() -> String {
    match option_env!("MLOG_VIDEO_GIT_HASH") {
        Some(hash) => format!("{} ({hash})", env!("CARGO_PKG_VERSION")),
        None => env!("CARGO_PKG_VERSION").to_owned(),
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Encode {
            video,
            config,
            output,
            regen_id,
            keep_intermediate,
            ffmpeg,
        } => {
            let options = ConfigLoadOptions {
                regenerate_id: regen_id,
            };
            let summary = run_encode(
                &video,
                &config,
                output,
                options,
                keep_intermediate,
                ffmpeg.into(),
            )?;
            print_summary(&summary, cli.json)
        }
        Commands::Raw {
            input,
            name,
            config,
            output,
        } => {
            let summary = run_raw(&input, name, &config, output)?;
            print_summary(&summary, cli.json)
        }
        Commands::Config { config, regen_id } => {
            let config = load_or_create_config(
                &config,
                ConfigLoadOptions {
                    regenerate_id: regen_id,
                },
            )?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Check { dir } => {
            let report = verify_output(&dir)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "OK: {} ({} blocks, {} frames, type {}, id {})",
                    dir.display(),
                    report.num_blocks,
                    report.total_frames,
                    report.format_tag,
                    report.session_id
                );
            }
            Ok(())
        }
    }
}

fn resolve_session(
    config_path: &Path,
    output: Option<PathBuf>,
    options: ConfigLoadOptions,
) -> Result<SessionConfig> {
    let mut config = load_or_create_config(config_path, options)
        .map_err(|error| anyhow!(CodedError::io("E_CONFIG_WRITE", format!("{error:#}"))))?;
    if let Some(output) = output {
        config.output_dir = output;
    }
    info!(
        resolution = %format!("{}x{}", config.width, config.height),
        fps = config.fps,
        id = %config.session_id,
        version = config.format_version,
        output = %config.output_dir.display(),
        "configuration"
    );
    Ok(config)
}

fn require_input(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(anyhow!(CodedError::usage(
            "E_INPUT_MISSING",
            format!("file not found: {}", path.display()),
        )));
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn run_encode(
    video: &Path,
    config_path: &Path,
    output: Option<PathBuf>,
    options: ConfigLoadOptions,
    keep_intermediate: bool,
    mode: FfmpegMode,
) -> Result<EncodeSummary> {
    require_input(video)?;
    let tools = FfmpegTools::resolve(mode)?;
    tools.ensure_available()?;

    let config = resolve_session(config_path, output, options)?;
    fs::create_dir_all(&config.output_dir).map_err(|error| {
        anyhow!(CodedError::io(
            "E_OUTPUT_DIR",
            format!("failed to create {}: {error}", config.output_dir.display()),
        ))
    })?;

    let target = TranscodeTarget {
        width: config.width,
        height: config.height,
        fps: config.fps,
    };
    let intermediate = IntermediateFile::new(
        config.output_dir.join(target.intermediate_file_name()),
        keep_intermediate,
    );

    let duration = probe::media_duration(&tools.ffprobe, video);
    if duration.is_none() {
        warn!("video duration unknown, transcode progress will not be shown");
    }
    let mut last_report = Instant::now();
    transcode(&tools, video, intermediate.path(), target, duration, |progress| {
        if last_report.elapsed() < TRANSCODE_REPORT_INTERVAL {
            return;
        }
        last_report = Instant::now();
        if let (Some(percent), Some(total)) = (progress.percent(), progress.duration_seconds) {
            info!(
                "ffmpeg: [{percent:5.1}%] time {}/{}",
                format_clock(progress.elapsed_seconds),
                format_clock(total)
            );
        }
    })
    .with_context(|| format!("failed to transcode {}", video.display()))?;

    let expected_frames = probe::frame_count(&tools.ffprobe, intermediate.path());
    match expected_frames {
        Some(count) => info!(frames = count, "frames in processed video"),
        None => warn!("could not determine frame count, processing all available frames"),
    }

    let mut decoder = FfmpegDecoder::spawn(&tools.ffmpeg, intermediate.path(), config.width, config.height)?;
    let mut observer = ProgressObserver::new(expected_frames);
    let result = encode_frames(decoder.frames(), &display_name(video), &config, &mut observer);
    // On failure the decoder may be blocked on a full pipe; dropping kills it.
    let finished = if result.is_ok() {
        decoder.finish()
    } else {
        drop(decoder);
        Ok(())
    };
    drop(intermediate);

    let summary = result?;
    finished?;
    Ok(summary)
}

fn run_raw(
    input: &Path,
    name: Option<String>,
    config_path: &Path,
    output: Option<PathBuf>,
) -> Result<EncodeSummary> {
    require_input(input)?;
    let config = resolve_session(config_path, output, ConfigLoadOptions::default())?;
    let file = File::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    let frames = RawFrameReader::new(
        BufReader::new(file),
        config.width as usize,
        config.height as usize,
    );
    let name = name.unwrap_or_else(|| display_name(input));
    encode_frames(frames, &name, &config, &mut ProgressObserver::new(None))
}

fn print_summary(summary: &EncodeSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!("Blocks created: {}", summary.num_blocks);
    println!("Files saved to: {}", summary.output_dir.display());
    println!("Total frames processed: {}", summary.total_frames);
    println!(
        "Approximate playback time: {:.1} seconds",
        summary.playback_seconds
    );
    Ok(())
}

struct ProgressObserver {
    expected_frames: Option<usize>,
    blocks_written: usize,
    last_block_report: Instant,
}

impl ProgressObserver {
    fn new(expected_frames: Option<usize>) -> Self {
        Self {
            expected_frames: expected_frames.filter(|count| *count > 0),
            blocks_written: 0,
            last_block_report: Instant::now(),
        }
    }
}

impl EncodeObserver for ProgressObserver {
    fn on_frame_read(&mut self, frames_so_far: usize) {
        if frames_so_far % FRAME_REPORT_EVERY != 0 {
            return;
        }
        match self.expected_frames {
            Some(expected) => {
                let percent = (frames_so_far as f64 / expected as f64 * 100.0).min(100.0);
                info!("frame extraction: [{percent:5.1}%] ({frames_so_far}/{expected})");
            }
            None => info!("frame extraction: {frames_so_far} frames"),
        }
    }

    fn on_block_written(&mut self, block_index: usize, _path: &Path) {
        self.blocks_written += 1;
        if self.last_block_report.elapsed() >= BLOCK_REPORT_INTERVAL || block_index == 0 {
            self.last_block_report = Instant::now();
            info!(
                "generation: block {block_index} written ({} so far)",
                self.blocks_written
            );
        }
    }
}
