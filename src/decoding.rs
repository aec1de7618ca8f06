use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};

use crate::quantize::{frame_size_bytes, Frame};

/// Pull-based stream of fixed-size rgb24 frames read from any byte source.
///
/// Ends at a clean EOF. A short trailing buffer is dropped with a warning.
pub struct RawFrameReader<R> {
    source: R,
    width: usize,
    height: usize,
    frames_read: usize,
    finished: bool,
}

impl<R: Read> RawFrameReader<R> {
    pub fn new(source: R, width: usize, height: usize) -> Self {
        Self {
            source,
            width,
            height,
            frames_read: 0,
            finished: false,
        }
    }

    pub fn frames_read(&self) -> usize {
        self.frames_read
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let frame_size = frame_size_bytes(self.width, self.height);
        let mut buffer = vec![0u8; frame_size];
        let mut filled = 0;
        while filled < frame_size {
            match self.source.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => {
                    return Err(error).with_context(|| {
                        format!("failed to read raw frame #{}", self.frames_read)
                    })
                }
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < frame_size {
            warn!(
                frame = self.frames_read,
                bytes = filled,
                expected = frame_size,
                "incomplete trailing frame, skipping"
            );
            return Ok(None);
        }

        self.frames_read += 1;
        Frame::from_rgb24(self.width, self.height, buffer).map(Some)
    }
}

impl<R: Read> Iterator for RawFrameReader<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(error) => {
                self.finished = true;
                Some(Err(error))
            }
        }
    }
}

/// ffmpeg process decoding a video to rgb24 on stdout.
pub struct FfmpegDecoder {
    frames: RawFrameReader<ChildStdout>,
    child: Child,
}

impl FfmpegDecoder {
    pub fn spawn(ffmpeg_path: &Path, input_path: &Path, width: u32, height: u32) -> Result<Self> {
        let args = ffmpeg_rawvideo_output_args(input_path);
        debug!(command = %format!("{} {}", ffmpeg_path.display(), args.join(" ")), "spawning decoder");

        let mut child = Command::new(ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to spawn ffmpeg decoder at {}", ffmpeg_path.display()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdout"))?;

        Ok(Self {
            frames: RawFrameReader::new(stdout, width as usize, height as usize),
            child,
        })
    }

    pub fn frames(&mut self) -> &mut RawFrameReader<ChildStdout> {
        &mut self.frames
    }

    pub fn finish(mut self) -> Result<()> {
        let status = self.child.wait().context("failed waiting for ffmpeg decoder")?;
        if !status.success() {
            warn!(%status, "ffmpeg decoder exited unsuccessfully");
        }
        Ok(())
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

pub fn ffmpeg_rawvideo_output_args(input_path: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-i".to_owned(),
        input_path.to_string_lossy().into_owned(),
        "-f".to_owned(),
        "rawvideo".to_owned(),
        "-pix_fmt".to_owned(),
        "rgb24".to_owned(),
        "-vcodec".to_owned(),
        "rawvideo".to_owned(),
        "-an".to_owned(),
        "-sn".to_owned(),
        "-".to_owned(),
    ]
}
