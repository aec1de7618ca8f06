use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_CONFIG_FILE: &str = "video_config.json";
pub const DEFAULT_WIDTH: u32 = 52;
pub const DEFAULT_HEIGHT: u32 = 39;
pub const DEFAULT_FPS: u32 = 60;
pub const DEFAULT_FRAMES_PER_BLOCK: u32 = 16;
pub const DEFAULT_OUTPUT_DIR: &str = "out";
pub const DEFAULT_FORMAT_TAG: &str = "msvc";
pub const DEFAULT_FORMAT_VERSION: u32 = 1;

const SESSION_ID_LEN: usize = 8;

/// Resolved, read-only settings for one encoding run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frames_per_block: u32,
    pub output_dir: PathBuf,
    pub format_tag: String,
    pub format_version: u32,
    pub session_id: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            frames_per_block: DEFAULT_FRAMES_PER_BLOCK,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            format_tag: DEFAULT_FORMAT_TAG.to_owned(),
            format_version: DEFAULT_FORMAT_VERSION,
            session_id: generate_session_id(),
        }
    }
}

impl SessionConfig {
    pub fn frame_size_bytes(&self) -> usize {
        crate::quantize::frame_size_bytes(self.width as usize, self.height as usize)
    }

    pub fn frames_per_block(&self) -> usize {
        self.frames_per_block as usize
    }
}

/// On-disk shape of `video_config.json`. Numbers are signed so that
/// non-positive values can be detected and rejected rather than failing to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ConfigFile {
    width: i64,
    height: i64,
    fps: i64,
    frames_per_block: i64,
    output_dir: String,
    #[serde(rename = "fileType")]
    file_type: String,
    version: i64,
    id: Option<String>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            width: i64::from(DEFAULT_WIDTH),
            height: i64::from(DEFAULT_HEIGHT),
            fps: i64::from(DEFAULT_FPS),
            frames_per_block: i64::from(DEFAULT_FRAMES_PER_BLOCK),
            output_dir: DEFAULT_OUTPUT_DIR.to_owned(),
            file_type: DEFAULT_FORMAT_TAG.to_owned(),
            version: i64::from(DEFAULT_FORMAT_VERSION),
            id: None,
        }
    }
}

impl ConfigFile {
    fn numbers_are_positive(&self) -> bool {
        [
            self.width,
            self.height,
            self.fps,
            self.frames_per_block,
            self.version,
        ]
        .iter()
        .all(|value| *value > 0 && *value <= i64::from(u32::MAX))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigLoadOptions {
    pub regenerate_id: bool,
}

/// Loads `path`, filling missing keys, repairing invalid content and assigning
/// a session id as needed, then writes the resolved file back.
///
/// Only the final save can fail; unreadable or invalid content falls back to
/// defaults with a warning.
pub fn load_or_create_config(path: &Path, options: ConfigLoadOptions) -> Result<SessionConfig> {
    let mut file = read_config_file(path).unwrap_or_default();

    if !file.numbers_are_positive() {
        warn!(
            path = %path.display(),
            "invalid config parameters (width/height/fps/frames_per_block/version must be > 0), using defaults"
        );
        file = ConfigFile::default();
    }

    if let Some(id) = file.id.as_deref() {
        if !is_valid_session_id(id) {
            warn!(id, "stored session id is not 8 lowercase hex characters, regenerating");
            file.id = None;
        }
    }

    let old_id = file.id.clone();
    if options.regenerate_id || old_id.is_none() {
        let new_id = generate_session_id();
        if let Some(old_id) = old_id.as_deref().filter(|_| options.regenerate_id) {
            info!("session id regenerated: {old_id} → {new_id}");
        }
        file.id = Some(new_id);
    }

    save_config_file(path, &file)?;
    Ok(resolve(path, file))
}

fn read_config_file(path: &Path) -> Option<ConfigFile> {
    if !path.exists() {
        info!(path = %path.display(), "creating new config");
        return None;
    }
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to read config, creating a new one");
            return None;
        }
    };
    match serde_json::from_str::<ConfigFile>(&contents) {
        Ok(file) => Some(file),
        Err(error) => {
            warn!(
                path = %path.display(),
                line = error.line(),
                column = error.column(),
                %error,
                "failed to parse config, creating a new one"
            );
            None
        }
    }
}

fn save_config_file(path: &Path, file: &ConfigFile) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(file).context("failed to serialize config")?;
    fs::write(path, json).with_context(|| format!("failed to write config {}", path.display()))
}

fn resolve(path: &Path, file: ConfigFile) -> SessionConfig {
    let output_dir = PathBuf::from(&file.output_dir);
    let output_dir = if output_dir.is_absolute() {
        output_dir
    } else {
        path.parent()
            .map_or_else(|| output_dir.clone(), |base| base.join(&output_dir))
    };

    // Range checked by `numbers_are_positive`.
    SessionConfig {
        width: file.width as u32,
        height: file.height as u32,
        fps: file.fps as u32,
        frames_per_block: file.frames_per_block as u32,
        output_dir,
        format_tag: file.file_type,
        format_version: file.version as u32,
        session_id: file.id.unwrap_or_else(generate_session_id),
    }
}

/// Random 32-bit token rendered as 8 lowercase hex digits.
pub fn generate_session_id() -> String {
    format!("{:08x}", Uuid::new_v4().as_u128() as u32)
}

pub fn is_valid_session_id(id: &str) -> bool {
    id.len() == SESSION_ID_LEN && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
