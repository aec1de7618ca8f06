//! Encodes decoded video frames into chunked `set`-statement block files for a
//! script-driven player: per-pixel color channels quantized into printable,
//! escape-free characters.

pub mod block_writer;
pub mod blocks;
pub mod config;
pub mod decoding;
pub mod encoding;
pub mod error_codes;
pub mod mlog;
pub mod pipeline;
pub mod probe;
pub mod quantize;
pub mod verify;
