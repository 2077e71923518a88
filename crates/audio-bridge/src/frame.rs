use std::time::Duration;

use bytes::Bytes;

use crate::{AudioError, AudioResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Interleaved signed 16-bit little-endian PCM.
    S16,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    pub fn channels(self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }

    pub fn from_channels(channels: u16) -> AudioResult<Self> {
        match channels {
            1 => Ok(ChannelLayout::Mono),
            2 => Ok(ChannelLayout::Stereo),
            other => Err(AudioError::InvalidConfig(format!(
                "unsupported channel count {other}"
            ))),
        }
    }
}

/// One block of interleaved PCM. `pts` is expressed in samples (time base
/// `1 / sample_rate`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub format: SampleFormat,
    pub layout: ChannelLayout,
    pub sample_rate: u32,
    pub pts: i64,
    /// Samples per channel.
    pub samples: usize,
    pub data: Bytes,
}

impl AudioFrame {
    pub fn from_interleaved(
        layout: ChannelLayout,
        sample_rate: u32,
        pts: i64,
        interleaved: &[i16],
    ) -> Self {
        let mut data = Vec::with_capacity(interleaved.len() * 2);
        for sample in interleaved {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self {
            format: SampleFormat::S16,
            layout,
            sample_rate,
            pts,
            samples: interleaved.len() / layout.channels(),
            data: Bytes::from(data),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples as f64 / self.sample_rate as f64)
    }

    pub fn interleaved(&self) -> Vec<i16> {
        self.data
            .chunks_exact(self.format.bytes_per_sample())
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }
}

/// Presentation timestamp counter for a single track.
#[derive(Debug, Default, Clone)]
pub struct PtsClock {
    next: i64,
}

impl PtsClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pts for a frame of `samples` samples and advances past it.
    pub fn stamp(&mut self, samples: usize) -> i64 {
        let pts = self.next;
        self.next += samples as i64;
        pts
    }

    pub fn peek(&self) -> i64 {
        self.next
    }
}
