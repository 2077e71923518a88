//! G.711 μ-law helpers for handing bridge frames to a PCMU track.

use crate::{AudioError, AudioFrame, AudioResult};

pub const PCMU_RATE: u32 = 8_000;

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32_635;

pub fn ulaw_encode(sample: i16) -> u8 {
    let sample = sample as i32;
    let sign = if sample < 0 { 0x80 } else { 0x00 };
    let magnitude = sample.abs().min(ULAW_CLIP) + ULAW_BIAS;

    let mut exponent = 7;
    while exponent > 0 && magnitude & (0x4000 >> (7 - exponent)) == 0 {
        exponent -= 1;
    }
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

pub fn ulaw_decode(byte: u8) -> i16 {
    let byte = !byte as i32;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0F;
    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if byte & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Mixes interleaved frames down to mono, decimates to 8 kHz and encodes.
///
/// Decimation is a box average over `input_rate / 8000` samples; partial
/// windows carry over to the next frame so block boundaries do not drop
/// samples.
#[derive(Debug)]
pub struct PcmuEncoder {
    ratio: usize,
    acc: i64,
    filled: usize,
}

impl PcmuEncoder {
    pub fn new(input_rate: u32) -> AudioResult<Self> {
        if input_rate == 0 || input_rate % PCMU_RATE != 0 {
            return Err(AudioError::UnsupportedRate(input_rate));
        }
        Ok(Self {
            ratio: (input_rate / PCMU_RATE) as usize,
            acc: 0,
            filled: 0,
        })
    }

    pub fn encode(&mut self, frame: &AudioFrame) -> Vec<u8> {
        let channels = frame.layout.channels();
        let samples = frame.interleaved();
        let mut out = Vec::with_capacity(frame.samples / self.ratio + 1);
        for chunk in samples.chunks_exact(channels) {
            let mono = chunk.iter().map(|s| *s as i64).sum::<i64>() / channels as i64;
            self.acc += mono;
            self.filled += 1;
            if self.filled == self.ratio {
                out.push(ulaw_encode((self.acc / self.ratio as i64) as i16));
                self.acc = 0;
                self.filled = 0;
            }
        }
        out
    }
}
