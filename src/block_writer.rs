use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::mlog::Statement;

pub const COUNT_FILE_NAME: &str = "video_blocks.txt";
pub const BLOCK_FILE_EXTENSION: &str = "mlog";

pub fn block_file_name(block_index: usize) -> String {
    format!("block_{block_index}.{BLOCK_FILE_EXTENSION}")
}

pub fn block_path(output_dir: &Path, block_index: usize) -> PathBuf {
    output_dir.join(block_file_name(block_index))
}

pub fn count_path(output_dir: &Path) -> PathBuf {
    output_dir.join(COUNT_FILE_NAME)
}

/// Joins statements with `\n` (no trailing newline).
pub fn render_block(statements: &[Statement]) -> String {
    statements
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Writes one block file, overwriting any previous file for the same index.
pub fn write_block(block_index: usize, statements: &[Statement], output_dir: &Path) -> Result<PathBuf> {
    let contents = render_block(statements);
    ensure_ascii(&contents).with_context(|| format!("block {block_index} is not ascii"))?;

    let path = block_path(output_dir, block_index);
    fs::write(&path, contents)
        .with_context(|| format!("failed to write block file {}", path.display()))?;
    Ok(path)
}

/// Writes the bare decimal block count.
pub fn write_count(num_blocks: usize, output_dir: &Path) -> Result<PathBuf> {
    let path = count_path(output_dir);
    fs::write(&path, num_blocks.to_string())
        .with_context(|| format!("failed to write count file {}", path.display()))?;
    Ok(path)
}

pub fn read_count(output_dir: &Path) -> Result<usize> {
    let path = count_path(output_dir);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read count file {}", path.display()))?;
    raw.trim()
        .parse::<usize>()
        .with_context(|| format!("count file {} does not hold an integer", path.display()))
}

fn ensure_ascii(contents: &str) -> Result<()> {
    if let Some((offset, ch)) = contents.char_indices().find(|(_, ch)| !ch.is_ascii()) {
        bail!("non-ascii character {ch:?} at byte {offset}");
    }
    Ok(())
}
