use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::block_writer::{count_path, write_block, write_count};
use crate::blocks::{assemble_block, block_count, block_frame_range};
use crate::config::SessionConfig;
use crate::error_codes::CodedError;
use crate::quantize::Frame;

/// Progress hooks for an encoding run. All methods default to no-ops.
pub trait EncodeObserver {
    fn on_frame_read(&mut self, _frames_so_far: usize) {}
    fn on_block_written(&mut self, _block_index: usize, _path: &Path) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl EncodeObserver for NoopObserver {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodeSummary {
    pub num_blocks: usize,
    pub total_frames: usize,
    pub output_dir: PathBuf,
    pub count_file: PathBuf,
    pub playback_seconds: f64,
}

/// Reads `frames` and writes them as block files under `config.output_dir`.
///
/// The header block needs the true frame count, so frames are held until the
/// stream ends; blocks are then written in index order and the count file
/// last. A count file left by an earlier run is removed before any frame is
/// consumed, so an aborted run never leaves one behind.
pub fn encode_frames<I>(
    frames: I,
    video_name: &str,
    config: &SessionConfig,
    observer: &mut dyn EncodeObserver,
) -> Result<EncodeSummary>
where
    I: IntoIterator<Item = Result<Frame>>,
{
    let output_dir = config.output_dir.as_path();
    fs::create_dir_all(output_dir).map_err(|error| {
        anyhow!(CodedError::io(
            "E_OUTPUT_DIR",
            format!("failed to create output dir {}: {error}", output_dir.display()),
        ))
    })?;
    remove_stale_count(output_dir)?;

    let mut collected = Vec::new();
    for frame in frames {
        let index = collected.len();
        let frame = frame.with_context(|| format!("failed to read frame #{index}"))?;
        ensure_frame_matches(&frame, config, index)?;
        collected.push(frame);
        observer.on_frame_read(collected.len());
    }

    let total_frames = collected.len();
    let frames_per_block = config.frames_per_block().max(1);
    let num_blocks = block_count(total_frames, frames_per_block);
    for block_index in 0..num_blocks {
        let range = block_frame_range(block_index, total_frames, frames_per_block);
        emit_block(
            &collected[range],
            block_index,
            total_frames,
            video_name,
            config,
            observer,
        )?;
    }

    let count_file = write_count(num_blocks, output_dir).map_err(|error| {
        anyhow!(CodedError::io("E_WRITE_COUNT", format!("{error:#}")))
    })?;
    info!(
        blocks = num_blocks,
        frames = total_frames,
        frames_per_block,
        "wrote block files"
    );

    Ok(EncodeSummary {
        num_blocks,
        total_frames,
        output_dir: output_dir.to_path_buf(),
        count_file,
        playback_seconds: total_frames as f64 / f64::from(config.fps.max(1)),
    })
}

fn remove_stale_count(output_dir: &Path) -> Result<()> {
    let path = count_path(output_dir);
    match fs::remove_file(&path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed count file from previous run");
            Ok(())
        }
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(anyhow!(CodedError::io(
            "E_STALE_COUNT",
            format!("failed to remove {}: {error}", path.display()),
        ))),
    }
}

fn ensure_frame_matches(frame: &Frame, config: &SessionConfig, index: usize) -> Result<()> {
    if frame.width() != config.width as usize || frame.height() != config.height as usize {
        bail!(
            "frame #{index} is {}x{}, session expects {}x{}",
            frame.width(),
            frame.height(),
            config.width,
            config.height
        );
    }
    Ok(())
}

fn emit_block(
    frames: &[Frame],
    block_index: usize,
    total_frames: usize,
    video_name: &str,
    config: &SessionConfig,
    observer: &mut dyn EncodeObserver,
) -> Result<()> {
    let statements = assemble_block(frames, block_index, total_frames, video_name, config);
    let path = write_block(block_index, &statements, &config.output_dir).map_err(|error| {
        anyhow!(CodedError::io("E_WRITE_BLOCK", format!("{error:#}")))
    })?;
    observer.on_block_written(block_index, &path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_writer::block_path;
    use crate::error_codes::find_coded_error;
    use tempfile::tempdir;

    fn config_for(dir: &Path, frames_per_block: u32) -> SessionConfig {
        SessionConfig {
            width: 1,
            height: 1,
            fps: 10,
            frames_per_block,
            output_dir: dir.join("out"),
            session_id: "12345678".to_owned(),
            ..SessionConfig::default()
        }
    }

    fn gray(level: u8) -> Result<Frame> {
        Frame::from_rgb24(1, 1, vec![level; 3])
    }

    #[derive(Default)]
    struct Recorder {
        frames: usize,
        blocks: Vec<usize>,
    }

    impl EncodeObserver for Recorder {
        fn on_frame_read(&mut self, frames_so_far: usize) {
            self.frames = frames_so_far;
        }

        fn on_block_written(&mut self, block_index: usize, _path: &Path) {
            self.blocks.push(block_index);
        }
    }

    #[test]
    fn partial_last_block_and_header_total_are_consistent() {
        let dir = tempdir().expect("tempdir should create");
        let config = config_for(dir.path(), 2);
        let frames = (0..5u8).map(|i| gray(i * 50));
        let mut recorder = Recorder::default();

        let summary = encode_frames(frames, "clip", &config, &mut recorder).expect("encode");
        assert_eq!(summary.num_blocks, 3);
        assert_eq!(summary.total_frames, 5);
        assert_eq!(summary.playback_seconds, 0.5);
        assert_eq!(recorder.frames, 5);
        assert_eq!(recorder.blocks, vec![0, 1, 2]);

        let header = fs::read_to_string(block_path(&config.output_dir, 0)).unwrap();
        assert!(header.contains("set frames 5"));
        let last = fs::read_to_string(block_path(&config.output_dir, 2)).unwrap();
        assert!(last.contains("set f0r"));
        assert!(!last.contains("set f1r"));
        assert_eq!(fs::read_to_string(count_path(&config.output_dir)).unwrap(), "3");
    }

    #[test]
    fn empty_stream_still_produces_header_block() {
        let dir = tempdir().expect("tempdir should create");
        let config = config_for(dir.path(), 16);
        let summary =
            encode_frames(Vec::<Result<Frame>>::new(), "none", &config, &mut NoopObserver)
                .expect("encode");
        assert_eq!(summary.num_blocks, 1);
        let header = fs::read_to_string(block_path(&config.output_dir, 0)).unwrap();
        assert!(header.contains("set frames 0"));
        assert!(header.ends_with("set loaded 1\nstop"));
    }

    #[test]
    fn read_failure_aborts_without_count_file() {
        let dir = tempdir().expect("tempdir should create");
        let config = config_for(dir.path(), 1);
        let frames = vec![gray(1), gray(2), Err(anyhow!("pipe closed"))];

        let error = encode_frames(frames, "clip", &config, &mut NoopObserver)
            .expect_err("read failure must abort");
        assert!(format!("{error:#}").contains("pipe closed"));
        assert!(!count_path(&config.output_dir).exists());
    }

    #[test]
    fn wrong_frame_size_is_rejected() {
        let dir = tempdir().expect("tempdir should create");
        let config = config_for(dir.path(), 4);
        let frames = vec![Frame::from_rgb24(2, 1, vec![0; 6])];
        let error = encode_frames(frames, "clip", &config, &mut NoopObserver)
            .expect_err("mismatch must abort");
        assert!(error.to_string().contains("session expects 1x1"));
    }

    #[test]
    fn unwritable_output_reports_io_error() {
        let dir = tempdir().expect("tempdir should create");
        let blocker = dir.path().join("out");
        fs::write(&blocker, "not a directory").unwrap();
        let config = config_for(dir.path(), 4);

        let error = encode_frames(vec![gray(0)], "clip", &config, &mut NoopObserver)
            .expect_err("output dir is a file");
        let coded = find_coded_error(&error).expect("coded error");
        assert_eq!(coded.code, "E_OUTPUT_DIR");
    }

    #[test]
    fn aborted_rerun_leaves_no_count_file_behind() {
        let dir = tempdir().expect("tempdir should create");
        let mut config = config_for(dir.path(), 2);
        config.session_id = "aaaaaaaa".to_owned();
        let first = (0..6u8).map(gray);
        encode_frames(first, "clip", &config, &mut NoopObserver).expect("first run");
        assert_eq!(fs::read_to_string(count_path(&config.output_dir)).unwrap(), "3");

        config.session_id = "bbbbbbbb".to_owned();
        let second = vec![gray(1), gray(2), gray(3), gray(4), Err(anyhow!("pipe closed"))];
        let mut recorder = Recorder::default();
        encode_frames(second, "clip", &config, &mut recorder).expect_err("rerun must abort");

        assert!(!count_path(&config.output_dir).exists());
        assert!(recorder.blocks.is_empty());
        let header = fs::read_to_string(block_path(&config.output_dir, 0)).unwrap();
        assert!(header.contains("set id \"aaaaaaaa\""));
    }

    #[test]
    fn huge_frames_per_block_holds_one_frame() {
        let dir = tempdir().expect("tempdir should create");
        let config = config_for(dir.path(), u32::MAX);
        let summary =
            encode_frames(vec![gray(7)], "clip", &config, &mut NoopObserver).expect("encode");
        assert_eq!(summary.num_blocks, 1);
        assert_eq!(summary.total_frames, 1);
        assert!(!block_path(&config.output_dir, 1).exists());
    }
}
