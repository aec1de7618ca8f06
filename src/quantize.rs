use anyhow::{bail, Result};

/// Lowest character code a quantized sample can take (`#`).
pub const QUANT_MIN: u8 = 35;
/// Highest character code a quantized sample can take (`~`).
pub const QUANT_MAX: u8 = 126;
/// Backslash. Never emitted: the consumer treats it as an escape lead.
pub const QUANT_FORBIDDEN: u8 = 92;
/// Where the forbidden code collapses to.
pub const QUANT_FORBIDDEN_REMAP: u8 = 91;

const QUANT_SPAN: f32 = 91.0;

/// Maps one 8-bit color sample onto a printable, escape-free character code.
///
/// `floor(35 + sample / 255 * 91)`, clamped to `[35, 126]`, with 92 folded
/// into 91, so the samples that would land on 92 share code 91 with their
/// darker neighbours.
pub fn quantize(sample: u8) -> u8 {
    let scaled = (f32::from(QUANT_MIN) + (f32::from(sample) / 255.0) * QUANT_SPAN).floor();
    let clamped = scaled.clamp(f32::from(QUANT_MIN), f32::from(QUANT_MAX)) as u8;
    if clamped == QUANT_FORBIDDEN {
        QUANT_FORBIDDEN_REMAP
    } else {
        clamped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    R,
    G,
    B,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::R, Channel::G, Channel::B];

    pub fn offset(self) -> usize {
        match self {
            Self::R => 0,
            Self::G => 1,
            Self::B => 2,
        }
    }

    pub fn suffix(self) -> char {
        match self {
            Self::R => 'r',
            Self::G => 'g',
            Self::B => 'b',
        }
    }
}

/// One decoded RGB24 frame, row-major, 3 bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: usize,
    height: usize,
    rgb: Vec<u8>,
}

impl Frame {
    pub fn from_rgb24(width: usize, height: usize, rgb: Vec<u8>) -> Result<Self> {
        let expected = frame_size_bytes(width, height);
        if rgb.len() != expected {
            bail!(
                "frame buffer is {} bytes, expected {} for {}x{} rgb24",
                rgb.len(),
                expected,
                width,
                height
            );
        }
        Ok(Self { width, height, rgb })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.rgb
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let start = (y * self.width + x) * 3;
        [self.rgb[start], self.rgb[start + 1], self.rgb[start + 2]]
    }
}

pub fn frame_size_bytes(width: usize, height: usize) -> usize {
    width * height * 3
}

/// Quantized string for one channel of `frame`, one char per pixel in scan order.
pub fn encode_channel(frame: &Frame, channel: Channel) -> String {
    frame
        .as_bytes()
        .chunks_exact(3)
        .map(|pixel| char::from(quantize(pixel[channel.offset()])))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub r: String,
    pub g: String,
    pub b: String,
}

impl EncodedFrame {
    pub fn channel(&self, channel: Channel) -> &str {
        match channel {
            Channel::R => &self.r,
            Channel::G => &self.g,
            Channel::B => &self.b,
        }
    }
}

pub fn encode_frame(frame: &Frame) -> EncodedFrame {
    EncodedFrame {
        r: encode_channel(frame, Channel::R),
        g: encode_channel(frame, Channel::G),
        b: encode_channel(frame, Channel::B),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_hits_both_ends_exactly() {
        assert_eq!(quantize(0), 35);
        assert_eq!(quantize(255), 126);
    }

    #[test]
    fn quantize_stays_in_range_and_never_emits_backslash() {
        for sample in 0..=255u8 {
            let value = quantize(sample);
            assert!(
                (QUANT_MIN..=QUANT_MAX).contains(&value),
                "sample {sample} quantized to {value}"
            );
            assert_ne!(value, QUANT_FORBIDDEN, "sample {sample} produced a backslash");
        }
    }

    #[test]
    fn backslash_level_collapses_into_bracket() {
        // 35 + s/255*91 lands in [92, 93) for s in 160..=162.
        assert_eq!(quantize(160), 91);
        assert_eq!(quantize(161), 91);
        assert_eq!(quantize(162), 91);
        assert_eq!(quantize(158), 91);
        assert_eq!(quantize(163), 93);
    }

    #[test]
    fn quantize_is_monotonic() {
        let mut previous = quantize(0);
        for sample in 1..=255u8 {
            let value = quantize(sample);
            assert!(value >= previous, "quantize dropped at sample {sample}");
            previous = value;
        }
    }

    #[test]
    fn channel_strings_follow_row_major_order() {
        let rgb = vec![
            0, 10, 20, //
            255, 30, 40, //
            128, 50, 60, //
            64, 70, 80,
        ];
        let frame = Frame::from_rgb24(2, 2, rgb).expect("frame should build");
        assert_eq!(frame.pixel(1, 0), [255, 30, 40]);

        let encoded = encode_frame(&frame);
        let codes = encoded.r.bytes().collect::<Vec<_>>();
        assert_eq!(codes, vec![35, 126, quantize(128), quantize(64)]);
        assert_eq!(encoded.g.len(), 4);
        assert_eq!(encoded.channel(Channel::B).as_bytes()[3], quantize(80));
    }

    #[test]
    fn exhaustive_levels_never_produce_backslash_in_any_channel() {
        let rgb = (0..=255u8).flat_map(|v| [v, v, v]).collect::<Vec<_>>();
        let frame = Frame::from_rgb24(16, 16, rgb).expect("frame should build");
        for channel in Channel::ALL {
            let encoded = encode_channel(&frame, channel);
            assert!(!encoded.contains('\\'));
            assert!(!encoded.contains('"'));
        }
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let error = Frame::from_rgb24(2, 2, vec![0; 11]).expect_err("short buffer must fail");
        assert!(error.to_string().contains("expected 12"));
    }
}
