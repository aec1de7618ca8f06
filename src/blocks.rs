use std::ops::Range;

use crate::config::SessionConfig;
use crate::mlog::{escape_value, Statement};
use crate::quantize::{encode_frame, Channel, Frame};

/// Statements every block carries outside its frame payload:
/// `loaded 0`, `type`, `id`, `videoBlock`, then `loaded 1` and `stop`.
const BLOCK_FIXED_STATEMENTS: usize = 6;
const HEADER_EXTRA_STATEMENTS: usize = 5;
const CONTINUATION_EXTRA_STATEMENTS: usize = 1;

/// Number of blocks needed for `total_frames`. Never zero.
pub fn block_count(total_frames: usize, frames_per_block: usize) -> usize {
    let frames_per_block = frames_per_block.max(1);
    ((total_frames + frames_per_block - 1) / frames_per_block).max(1)
}

/// Frame range `[start, end)` covered by `block_index`.
pub fn block_frame_range(
    block_index: usize,
    total_frames: usize,
    frames_per_block: usize,
) -> Range<usize> {
    let start = (block_index * frames_per_block).min(total_frames);
    let end = (start + frames_per_block).min(total_frames);
    start..end
}

pub fn expected_statement_count(frames_in_block: usize, is_header: bool) -> usize {
    let role = if is_header {
        HEADER_EXTRA_STATEMENTS
    } else {
        CONTINUATION_EXTRA_STATEMENTS
    };
    BLOCK_FIXED_STATEMENTS + role + 3 * frames_in_block
}

/// Strips raw double quotes from a display name, then escapes what remains.
/// Characters outside printable ASCII become `?` so the block stays ASCII
/// and single-line.
pub fn header_name(video_name: &str) -> String {
    let printable = video_name
        .chars()
        .filter(|ch| *ch != '"')
        .map(|ch| if ch.is_ascii_graphic() || ch == ' ' { ch } else { '?' })
        .collect::<String>();
    escape_value(&printable)
}

/// Builds the ordered statement list for one block.
///
/// Session identity (`type`, `id`, `videoBlock`) is repeated in every block so
/// the consumer can validate blocks independently. Block 0 additionally
/// carries the header fields.
pub fn assemble_block(
    frames: &[Frame],
    block_index: usize,
    total_frame_count: usize,
    video_name: &str,
    config: &SessionConfig,
) -> Vec<Statement> {
    let is_header = block_index == 0;
    let mut statements =
        Vec::with_capacity(expected_statement_count(frames.len(), is_header));

    statements.push(Statement::set_int("loaded", 0));
    statements.push(Statement::set_str("type", config.format_tag.as_str()));
    statements.push(Statement::set_str("id", config.session_id.as_str()));
    statements.push(Statement::set_int("videoBlock", block_index as u64));

    if is_header {
        statements.push(Statement::set_int("iAmHeader", 1));
        statements.push(Statement::set_str("name", header_name(video_name)));
        statements.push(Statement::set_int("frames", total_frame_count as u64));
        statements.push(Statement::set_int("fps", u64::from(config.fps)));
        statements.push(Statement::set_int("version", u64::from(config.format_version)));
    } else {
        statements.push(Statement::set_int("iAmHeader", 0));
    }

    for (position, frame) in frames.iter().enumerate() {
        let encoded = encode_frame(frame);
        for channel in Channel::ALL {
            // Channel strings are escape-free by construction.
            statements.push(Statement::set_str(
                format!("f{position}{}", channel.suffix()),
                encoded.channel(channel),
            ));
        }
    }

    statements.push(Statement::set_int("loaded", 1));
    statements.push(Statement::Stop);
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mlog::Value;

    fn test_config() -> SessionConfig {
        SessionConfig {
            width: 2,
            height: 1,
            fps: 30,
            frames_per_block: 2,
            session_id: "0badf00d".to_owned(),
            ..SessionConfig::default()
        }
    }

    fn solid_frame(level: u8) -> Frame {
        Frame::from_rgb24(2, 1, vec![level; 6]).expect("frame should build")
    }

    fn keys(statements: &[Statement]) -> Vec<String> {
        statements
            .iter()
            .map(|s| s.key().unwrap_or("stop").to_owned())
            .collect()
    }

    #[test]
    fn block_count_uses_ceiling_and_never_returns_zero() {
        assert_eq!(block_count(0, 16), 1);
        assert_eq!(block_count(100, 16), 7);
        assert_eq!(block_count(32, 16), 2);
        assert_eq!(block_count(33, 16), 3);
        assert_eq!(block_count(1, 16), 1);
    }

    #[test]
    fn frame_ranges_cover_sequence_without_gaps() {
        assert_eq!(block_frame_range(0, 100, 16), 0..16);
        assert_eq!(block_frame_range(6, 100, 16), 96..100);
        assert_eq!(block_frame_range(0, 0, 16), 0..0);
    }

    #[test]
    fn header_block_carries_session_fields_in_order() {
        let config = test_config();
        let frames = [solid_frame(0)];
        let statements = assemble_block(&frames, 0, 3, "clip", &config);

        assert_eq!(
            keys(&statements),
            vec![
                "loaded", "type", "id", "videoBlock", "iAmHeader", "name", "frames", "fps",
                "version", "f0r", "f0g", "f0b", "loaded", "stop",
            ]
        );
        assert_eq!(statements[4], Statement::set_int("iAmHeader", 1));
        assert_eq!(statements[6], Statement::set_int("frames", 3));
        assert_eq!(statements[7], Statement::set_int("fps", 30));
        assert_eq!(statements.len(), expected_statement_count(1, true));
    }

    #[test]
    fn continuation_block_omits_header_fields() {
        let config = test_config();
        let frames = [solid_frame(255), solid_frame(0)];
        let statements = assemble_block(&frames, 1, 3, "clip", &config);

        let keys = keys(&statements);
        for header_only in ["name", "frames", "fps", "version"] {
            assert!(!keys.iter().any(|k| k == header_only), "{header_only} leaked");
        }
        assert_eq!(statements[3], Statement::set_int("videoBlock", 1));
        assert_eq!(statements[4], Statement::set_int("iAmHeader", 0));
        assert_eq!(statements[5], Statement::set_str("f0r", "~~"));
        assert_eq!(statements[8], Statement::set_str("f1r", "##"));
        assert_eq!(statements.len(), expected_statement_count(2, false));
    }

    #[test]
    fn empty_header_block_still_has_metadata() {
        let statements = assemble_block(&[], 0, 0, "empty", &test_config());
        assert_eq!(statements.len(), expected_statement_count(0, true));
        assert_eq!(statements[6], Statement::set_int("frames", 0));
        assert_eq!(statements.last(), Some(&Statement::Stop));
    }

    #[test]
    fn header_name_strips_quotes_before_escaping() {
        assert_eq!(header_name(r#"my "best" clip"#), "my best clip");
        assert_eq!(header_name(r"dir\clip"), r"dir\\clip");
        assert_eq!(header_name("café\nnight"), "caf??night");

        let statements = assemble_block(&[], 0, 0, r#"a"b\c"#, &test_config());
        match &statements[5] {
            Statement::Set {
                value: Value::Str(name),
                ..
            } => assert_eq!(name, r"ab\\c"),
            other => panic!("unexpected statement {other:?}"),
        }
    }
}
