use std::fs;
use std::path::Path;

use mlog_video::block_writer::{block_path, count_path};
use mlog_video::config::SessionConfig;
use mlog_video::decoding::RawFrameReader;
use mlog_video::pipeline::{encode_frames, NoopObserver};
use sha2::{Digest, Sha256};
use tempfile::tempdir;

fn raw_clip(frames: usize) -> Vec<u8> {
    (0..frames * 4 * 3 * 3)
        .map(|i| ((i * 37 + i / 5) % 256) as u8)
        .collect()
}

fn encode_hash(output_dir: &Path, session_id: &str, raw: &[u8]) -> String {
    let config = SessionConfig {
        width: 4,
        height: 3,
        fps: 30,
        frames_per_block: 5,
        output_dir: output_dir.to_path_buf(),
        session_id: session_id.to_owned(),
        ..SessionConfig::default()
    };
    let summary = encode_frames(
        RawFrameReader::new(raw, 4, 3),
        "determinism",
        &config,
        &mut NoopObserver,
    )
    .expect("encode should succeed");

    let mut hasher = Sha256::new();
    hasher.update(fs::read(count_path(output_dir)).expect("count file"));
    for index in 0..summary.num_blocks {
        hasher.update(fs::read(block_path(output_dir, index)).expect("block file"));
    }
    format!("{:x}", hasher.finalize())
}

#[test]
fn same_input_and_session_produce_identical_blocks() {
    let raw = raw_clip(12);
    let first = tempdir().expect("tempdir should create");
    let second = tempdir().expect("tempdir should create");

    assert_eq!(
        encode_hash(first.path(), "cafebabe", &raw),
        encode_hash(second.path(), "cafebabe", &raw),
        "encoding must be deterministic"
    );
}

#[test]
fn session_id_changes_every_block() {
    let raw = raw_clip(12);
    let first = tempdir().expect("tempdir should create");
    let second = tempdir().expect("tempdir should create");

    assert_ne!(
        encode_hash(first.path(), "cafebabe", &raw),
        encode_hash(second.path(), "deadbeef", &raw)
    );
    let tail = fs::read_to_string(block_path(second.path(), 2)).expect("last block");
    assert!(tail.contains("set id \"deadbeef\""));
}
