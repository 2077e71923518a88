use std::f64::consts::TAU;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::{AudioError, AudioFrame, AudioResult, ChannelLayout, FrameSource, PtsClock};

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub start_hz: f64,
    pub end_hz: f64,
    /// Time for one leg of the sweep; a full up-and-down cycle takes twice this.
    pub sweep: Duration,
    pub sample_rate: u32,
    pub layout: ChannelLayout,
    pub block_size: usize,
    /// Linear gain applied before quantization, in `0.0..=1.0`.
    pub amplitude: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            start_hz: 220.0,
            end_hz: 880.0,
            sweep: Duration::from_secs(5),
            sample_rate: 48_000,
            layout: ChannelLayout::Mono,
            block_size: 1024,
            amplitude: 0.1,
        }
    }
}

/// Ping-pong sine sweep paced at real time.
#[derive(Debug)]
pub struct SweepGenerator {
    config: SweepConfig,
    phase: f64,
    elapsed: u64,
    clock: PtsClock,
}

impl SweepGenerator {
    pub fn new(config: SweepConfig) -> AudioResult<Self> {
        if config.sample_rate == 0 || config.block_size == 0 {
            return Err(AudioError::InvalidConfig(
                "sample rate and block size must be positive".into(),
            ));
        }
        if config.sweep.is_zero() {
            return Err(AudioError::InvalidConfig("sweep duration must be positive".into()));
        }
        if !(0.0..=1.0).contains(&config.amplitude) {
            return Err(AudioError::InvalidConfig(format!(
                "amplitude {} outside 0..=1",
                config.amplitude
            )));
        }
        Ok(Self {
            config,
            phase: 0.0,
            elapsed: 0,
            clock: PtsClock::new(),
        })
    }

    /// Instantaneous frequency `t` seconds after the start of the sweep.
    pub fn frequency_at(&self, t: f64) -> f64 {
        let leg = self.config.sweep.as_secs_f64();
        let pos = (t % (2.0 * leg)) / leg;
        let span = self.config.end_hz - self.config.start_hz;
        if pos <= 1.0 {
            self.config.start_hz + span * pos
        } else {
            self.config.end_hz - span * (pos - 1.0)
        }
    }

    /// Phase after the last rendered sample, in `[0, 2π)`.
    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Renders the next block without pacing.
    pub fn render_block(&mut self) -> AudioFrame {
        let rate = self.config.sample_rate as f64;
        let block = self.config.block_size;
        let channels = self.config.layout.channels();
        let scale = self.config.amplitude * i16::MAX as f64;

        let mut interleaved = Vec::with_capacity(block * channels);
        let mut phase = self.phase;
        for i in 0..block {
            let t = (self.elapsed + i as u64) as f64 / rate;
            phase += TAU * self.frequency_at(t) / rate;
            let sample = (scale * phase.sin()) as i16;
            interleaved.extend(std::iter::repeat_n(sample, channels));
        }
        self.phase = phase.rem_euclid(TAU);
        self.elapsed += block as u64;

        let pts = self.clock.stamp(block);
        AudioFrame::from_interleaved(self.config.layout, self.config.sample_rate, pts, &interleaved)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.config.block_size as f64 / self.config.sample_rate as f64)
    }
}

#[async_trait]
impl FrameSource for SweepGenerator {
    async fn next_frame(&mut self) -> AudioResult<AudioFrame> {
        sleep(self.block_duration()).await;
        Ok(self.render_block())
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn layout(&self) -> ChannelLayout {
        self.config.layout
    }

    fn block_size(&self) -> usize {
        self.config.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(block_size: usize) -> SweepGenerator {
        SweepGenerator::new(SweepConfig {
            block_size,
            ..SweepConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn frequency_ramps_up_then_back_down() {
        let sweep = generator(1024);
        assert!((sweep.frequency_at(0.0) - 220.0).abs() < 1e-9);
        assert!((sweep.frequency_at(2.5) - 550.0).abs() < 1e-9);
        assert!((sweep.frequency_at(5.0) - 880.0).abs() < 1e-9);
        assert!((sweep.frequency_at(7.5) - 550.0).abs() < 1e-9);
        assert!((sweep.frequency_at(10.0) - 220.0).abs() < 1e-9);
    }

    #[test]
    fn block_boundaries_do_not_change_the_waveform() {
        let mut whole = generator(2048);
        let mut halves = generator(1024);

        let reference = whole.render_block().interleaved();
        let mut split = halves.render_block().interleaved();
        split.extend(halves.render_block().interleaved());

        assert_eq!(reference.len(), split.len());
        for (i, (a, b)) in reference.iter().zip(&split).enumerate() {
            assert!((*a as i32 - *b as i32).abs() <= 1, "sample {i}: {a} vs {b}");
        }
        assert!((whole.phase() - halves.phase()).abs() < 1e-6);
    }

    #[test]
    fn phase_stays_wrapped() {
        let mut sweep = generator(4096);
        for _ in 0..50 {
            sweep.render_block();
            assert!((0.0..TAU).contains(&sweep.phase()));
        }
    }

    #[test]
    fn stereo_duplicates_each_sample() {
        let mut sweep = SweepGenerator::new(SweepConfig {
            layout: ChannelLayout::Stereo,
            block_size: 64,
            ..SweepConfig::default()
        })
        .unwrap();
        let frame = sweep.render_block();
        assert_eq!(frame.samples, 64);
        for pair in frame.interleaved().chunks_exact(2) {
            assert_eq!(pair[0], pair[1]);
        }
    }

    #[test]
    fn amplitude_out_of_range_is_rejected() {
        let result = SweepGenerator::new(SweepConfig {
            amplitude: 1.5,
            ..SweepConfig::default()
        });
        assert!(matches!(result, Err(AudioError::InvalidConfig(_))));
    }
}
