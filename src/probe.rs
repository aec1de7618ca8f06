use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use tracing::warn;

/// Container duration in seconds, or `None` (with a warning) if ffprobe can't tell.
pub fn media_duration(ffprobe: &Path, input: &Path) -> Option<f64> {
    let args = [
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ];
    match run_ffprobe(ffprobe, &args, input).and_then(|out| parse_duration(&out)) {
        Ok(duration) => Some(duration),
        Err(error) => {
            warn!(input = %input.display(), error = %format!("{error:#}"), "failed to determine duration");
            None
        }
    }
}

/// Exact decoded frame count of the first video stream.
pub fn frame_count(ffprobe: &Path, input: &Path) -> Option<usize> {
    let args = [
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-count_frames",
        "-show_entries",
        "stream=nb_read_frames",
        "-of",
        "csv=p=0",
    ];
    match run_ffprobe(ffprobe, &args, input).and_then(|out| parse_frame_count(&out)) {
        Ok(count) => Some(count),
        Err(error) => {
            warn!(input = %input.display(), error = %format!("{error:#}"), "failed to determine frame count");
            None
        }
    }
}

fn run_ffprobe(ffprobe: &Path, args: &[&str], input: &Path) -> Result<String> {
    let output = Command::new(ffprobe)
        .args(args)
        .arg(input)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to run {}", ffprobe.display()))?;
    if !output.status.success() {
        bail!(
            "ffprobe exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn parse_duration(raw: &str) -> Result<f64> {
    let value = raw.trim();
    let duration = value
        .parse::<f64>()
        .with_context(|| format!("unexpected duration '{value}'"))?;
    if !duration.is_finite() || duration < 0.0 {
        bail!("unexpected duration '{value}'");
    }
    Ok(duration)
}

fn parse_frame_count(raw: &str) -> Result<usize> {
    // Some containers report a trailing separator, e.g. "240,".
    let value = raw.trim().trim_end_matches(',');
    value
        .parse::<usize>()
        .with_context(|| format!("unexpected frame count '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_output_is_parsed() {
        assert_eq!(parse_duration("12.480000\n").unwrap(), 12.48);
        assert!(parse_duration("N/A").is_err());
        assert!(parse_duration("-1").is_err());
    }

    #[test]
    fn frame_count_output_is_parsed() {
        assert_eq!(parse_frame_count("240\n").unwrap(), 240);
        assert_eq!(parse_frame_count("240,\n").unwrap(), 240);
        assert!(parse_frame_count("").is_err());
    }

    #[test]
    fn missing_ffprobe_yields_none() {
        let probe = Path::new("definitely-not-an-ffprobe-binary");
        assert_eq!(media_duration(probe, Path::new("clip.mp4")), None);
        assert_eq!(frame_count(probe, Path::new("clip.mp4")), None);
    }
}
