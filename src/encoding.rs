use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error_codes::CodedError;

const STDERR_TAIL_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfmpegMode {
    Auto,
    System,
    Sidecar,
}

/// Resolved locations of the ffmpeg and ffprobe executables.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub mode_label: &'static str,
}

impl FfmpegTools {
    pub fn resolve(mode: FfmpegMode) -> Result<Self> {
        match mode {
            FfmpegMode::Auto | FfmpegMode::System => Ok(Self {
                ffmpeg: PathBuf::from("ffmpeg"),
                ffprobe: PathBuf::from("ffprobe"),
                mode_label: "system",
            }),
            FfmpegMode::Sidecar => {
                #[cfg(feature = "sidecar_ffmpeg")]
                {
                    let ffmpeg = ffmpeg_sidecar::paths::ffmpeg_path();
                    if !ffmpeg.exists() {
                        ffmpeg_sidecar::download::auto_download()
                            .context("failed to auto-download ffmpeg sidecar binary")?;
                    }
                    Ok(Self {
                        ffmpeg,
                        ffprobe: ffmpeg_sidecar::ffprobe::ffprobe_path(),
                        mode_label: "sidecar",
                    })
                }
                #[cfg(not(feature = "sidecar_ffmpeg"))]
                {
                    Err(anyhow!(CodedError::missing_dependency(
                        "E_SIDECAR_DISABLED",
                        "ffmpeg sidecar mode requested but mlog-video was built without `sidecar_ffmpeg`. Rebuild with `--features sidecar_ffmpeg`."
                    )))
                }
            }
        }
    }

    /// Fails with a missing-dependency error unless both tools answer `-version`.
    pub fn ensure_available(&self) -> Result<()> {
        for (name, path) in [("ffmpeg", &self.ffmpeg), ("ffprobe", &self.ffprobe)] {
            if !command_available(path) {
                return Err(anyhow!(CodedError::missing_dependency(
                    "E_FFMPEG_MISSING",
                    format!(
                        "{name} not found (mode={}, resolved_path={}). Install ffmpeg and verify `{name} -version` works.",
                        self.mode_label,
                        path.display()
                    ),
                )));
            }
        }
        Ok(())
    }
}

fn command_available(path: &Path) -> bool {
    Command::new(path)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Target geometry of the intermediate video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeTarget {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl TranscodeTarget {
    pub fn intermediate_file_name(&self) -> String {
        format!("o{}x{}.mkv", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TranscodeProgress {
    pub elapsed_seconds: f64,
    pub duration_seconds: Option<f64>,
}

impl TranscodeProgress {
    pub fn percent(&self) -> Option<f64> {
        self.duration_seconds
            .filter(|duration| *duration > 0.0)
            .map(|duration| (self.elapsed_seconds / duration * 100.0).min(100.0))
    }
}

/// Transcoded file under the output dir, removed on drop unless kept.
///
/// Created before the transcode starts so a failed transcode or decode
/// does not leave a partial file behind.
#[derive(Debug)]
pub struct IntermediateFile {
    path: PathBuf,
    keep: bool,
}

impl IntermediateFile {
    pub fn new(path: PathBuf, keep: bool) -> Self {
        Self { path, keep }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IntermediateFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "temporary file removed"),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!(path = %self.path.display(), %error, "failed to remove temporary file"),
        }
    }
}

/// Rescales `input` to the target size and rate with nearest-neighbor
/// sampling, writing a lossless FFV1 intermediate at `output`.
///
/// `on_progress` is called for each `time=` report ffmpeg prints.
pub fn transcode<F>(
    tools: &FfmpegTools,
    input: &Path,
    output: &Path,
    target: TranscodeTarget,
    duration_seconds: Option<f64>,
    mut on_progress: F,
) -> Result<()>
where
    F: FnMut(TranscodeProgress),
{
    let path_str = output.to_string_lossy();
    if path_str.chars().any(|c| c.is_control()) {
        bail!("intermediate path contains invalid control characters");
    }

    let args = transcode_args(input, output, target);
    debug!(command = %format!("{} {}", tools.ffmpeg.display(), args.join(" ")), "starting transcode");

    let mut child = Command::new(&tools.ffmpeg)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                anyhow!(CodedError::missing_dependency(
                    "E_FFMPEG_MISSING",
                    format!(
                        "ffmpeg executable not found (mode={}, resolved_path={})",
                        tools.mode_label,
                        tools.ffmpeg.display()
                    ),
                ))
            } else {
                anyhow!(
                    "failed to spawn ffmpeg process (mode={}, resolved_path={}, args='{}'): {error}",
                    tools.mode_label,
                    tools.ffmpeg.display(),
                    args.join(" ")
                )
            }
        })?;

    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("failed to capture ffmpeg stderr"))?;

    let mut transcript = String::new();
    let mut line = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match stderr.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Err(error).context("failed reading ffmpeg stderr"),
        };
        // Progress lines end in '\r', log lines in '\n'.
        for &byte in &chunk[..n] {
            if byte == b'\r' || byte == b'\n' {
                flush_line(&mut line, &mut transcript, duration_seconds, &mut on_progress);
            } else {
                line.push(byte);
            }
        }
    }
    flush_line(&mut line, &mut transcript, duration_seconds, &mut on_progress);

    let status = child.wait().context("failed waiting for ffmpeg process")?;
    if !status.success() {
        return Err(anyhow!(CodedError::transcode(
            "E_TRANSCODE_FAILED",
            format!(
                "ffmpeg failed with status {status} (mode={}, args='{}', stderr_tail='{}')",
                tools.mode_label,
                args.join(" "),
                last_n_chars(&transcript, STDERR_TAIL_CHARS)
            ),
        )));
    }
    Ok(())
}

fn flush_line<F>(
    line: &mut Vec<u8>,
    transcript: &mut String,
    duration_seconds: Option<f64>,
    on_progress: &mut F,
) where
    F: FnMut(TranscodeProgress),
{
    if line.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(line);
    if let Some(elapsed_seconds) = parse_progress_time(&text) {
        on_progress(TranscodeProgress {
            elapsed_seconds,
            duration_seconds,
        });
    }
    transcript.push_str(&text);
    transcript.push('\n');
    // Only the tail is ever reported.
    if transcript.len() > STDERR_TAIL_CHARS * 8 {
        *transcript = last_n_chars(transcript, STDERR_TAIL_CHARS * 2);
    }
    line.clear();
}

pub fn transcode_args(input: &Path, output: &Path, target: TranscodeTarget) -> Vec<String> {
    vec![
        "-hide_banner".to_owned(),
        "-i".to_owned(),
        input.to_string_lossy().into_owned(),
        "-vf".to_owned(),
        format!(
            "scale={}:{}:flags=neighbor,setsar=1/1",
            target.width, target.height
        ),
        "-c:v".to_owned(),
        "ffv1".to_owned(),
        "-r".to_owned(),
        target.fps.to_string(),
        "-an".to_owned(),
        "-y".to_owned(),
        "-loglevel".to_owned(),
        "info".to_owned(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Seconds encoded so far from an ffmpeg `time=HH:MM:SS.cc` report.
pub fn parse_progress_time(line: &str) -> Option<f64> {
    static TIME_RE: OnceLock<Regex> = OnceLock::new();
    let re = TIME_RE.get_or_init(|| {
        Regex::new(r"time=(\d+):(\d+):(\d+)\.(\d+)").expect("progress regex is valid")
    });
    let caps = re.captures(line)?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());
    let hours = field(1)?;
    let minutes = field(2)?;
    let seconds = field(3)?;
    let hundredths = field(4)?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds + hundredths / 100.0)
}

/// `HH:MM:SS` for progress display.
pub fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

fn last_n_chars(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    s.chars()
        .skip(count.saturating_sub(max_chars))
        .collect::<String>()
        .trim()
        .to_owned()
}
