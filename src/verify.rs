use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::block_writer::{block_path, read_count};
use crate::blocks::expected_statement_count;
use crate::mlog::{parse_statement, Statement, Value};

const HEADER_ONLY_KEYS: [&str; 4] = ["name", "frames", "fps", "version"];
const SHARED_KEYS: [&str; 4] = ["type", "id", "videoBlock", "iAmHeader"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub num_blocks: usize,
    pub total_frames: usize,
    pub session_id: String,
    pub format_tag: String,
}

/// Checks that an output directory holds a complete, self-consistent set of
/// block files matching its count file.
pub fn verify_output(output_dir: &Path) -> Result<VerifyReport> {
    let num_blocks = read_count(output_dir)?;
    if num_blocks == 0 {
        bail!("count file reports zero blocks");
    }

    let mut report = VerifyReport {
        num_blocks,
        total_frames: 0,
        session_id: String::new(),
        format_tag: String::new(),
    };
    let mut declared_frames = 0;
    let mut frames_seen = 0;

    for block_index in 0..num_blocks {
        let path = block_path(output_dir, block_index);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("missing or unreadable block {}", path.display()))?;
        let block = BlockView::parse(&contents)
            .with_context(|| format!("invalid block {}", path.display()))?;
        block
            .check(block_index)
            .with_context(|| format!("inconsistent block {}", path.display()))?;

        let format_tag = block.string("type")?;
        let session_id = block.string("id")?;
        if block_index == 0 {
            declared_frames = block.int("frames")? as usize;
            report.session_id = session_id.to_owned();
            report.format_tag = format_tag.to_owned();
        } else if session_id != report.session_id || format_tag != report.format_tag {
            bail!(
                "block {} belongs to session {}/{}, header says {}/{}",
                block_index,
                format_tag,
                session_id,
                report.format_tag,
                report.session_id
            );
        }
        frames_seen += block.frame_count;
    }

    if frames_seen != declared_frames {
        bail!("header declares {declared_frames} frames, blocks hold {frames_seen}");
    }
    report.total_frames = frames_seen;
    Ok(report)
}

struct BlockView {
    statements: Vec<Statement>,
    frame_count: usize,
}

impl BlockView {
    fn parse(contents: &str) -> Result<Self> {
        let statements = contents
            .split('\n')
            .enumerate()
            .map(|(line, text)| {
                parse_statement(text).with_context(|| format!("line {}", line + 1))
            })
            .collect::<Result<Vec<_>>>()?;
        let frame_count = statements
            .iter()
            .filter_map(Statement::key)
            .filter(|key| key.starts_with('f') && key.ends_with('r'))
            .count();
        Ok(Self {
            statements,
            frame_count,
        })
    }

    fn check(&self, block_index: usize) -> Result<()> {
        let is_header = block_index == 0;
        let expected = expected_statement_count(self.frame_count, is_header);
        if self.statements.len() != expected {
            bail!(
                "{} statements for {} frames, expected {}",
                self.statements.len(),
                self.frame_count,
                expected
            );
        }
        if self.statements.last() != Some(&Statement::Stop) {
            bail!("block does not end with stop");
        }
        if self.statements.first() != Some(&Statement::set_int("loaded", 0)) {
            bail!("block does not start with 'set loaded 0'");
        }
        for key in SHARED_KEYS {
            self.value(key)?;
        }
        if self.int("videoBlock")? != block_index as u64 {
            bail!("videoBlock does not match file index {block_index}");
        }
        if self.int("iAmHeader")? != u64::from(is_header) {
            bail!("iAmHeader does not match block role");
        }
        for key in HEADER_ONLY_KEYS {
            if self.value(key).is_ok() != is_header {
                bail!("header field '{key}' misplaced");
            }
        }
        for position in 0..self.frame_count {
            for suffix in ['r', 'g', 'b'] {
                let key = format!("f{position}{suffix}");
                if self.string(&key).is_err() {
                    bail!("missing channel string '{key}'");
                }
            }
        }
        Ok(())
    }

    fn value(&self, key: &str) -> Result<&Value> {
        self.statements
            .iter()
            .find_map(|statement| match statement {
                Statement::Set { key: k, value } if k == key => Some(value),
                _ => None,
            })
            .with_context(|| format!("missing '{key}'"))
    }

    fn int(&self, key: &str) -> Result<u64> {
        match self.value(key)? {
            Value::Int(value) => Ok(*value),
            Value::Str(_) => bail!("'{key}' should be an integer"),
        }
    }

    fn string(&self, key: &str) -> Result<&str> {
        match self.value(key)? {
            Value::Str(value) => Ok(value),
            Value::Int(_) => bail!("'{key}' should be a string"),
        }
    }
}
