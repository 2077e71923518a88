//! Paced PCM frame production for an outbound audio track.
//!
//! Two producers share the [`FrameSource`] contract: [`LiveCapture`], fed by a
//! hardware callback through the [`queue`] mailbox, and [`SweepGenerator`], a
//! synthetic ping-pong tone. Both emit fixed-size [`AudioFrame`]s whose `pts`
//! advances by exactly one block per frame.

use async_trait::async_trait;

pub mod capture;
pub mod codec;
pub mod frame;
pub mod queue;
pub mod sweep;

pub use capture::{CaptureConfig, FrameAssembler, LiveCapture};
pub use codec::{PcmuEncoder, ulaw_decode, ulaw_encode};
pub use frame::{AudioFrame, ChannelLayout, PtsClock, SampleFormat};
pub use queue::{BlockConsumer, BlockProducer, block_queue};
pub use sweep::{SweepConfig, SweepGenerator};

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("audio hardware unavailable: {0}")]
    HardwareUnavailable(String),
    #[error("audio producer closed")]
    SourceClosed,
    #[error("unsupported sample rate {0} Hz")]
    UnsupportedRate(u32),
    #[error("invalid audio config: {0}")]
    InvalidConfig(String),
}

pub type AudioResult<T> = Result<T, AudioError>;

/// Consumer side of the bridge. Sources run indefinitely; an error means the
/// producer behind the source is gone.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> AudioResult<AudioFrame>;

    fn sample_rate(&self) -> u32;

    fn layout(&self) -> ChannelLayout;

    /// Samples per channel in every frame this source emits.
    fn block_size(&self) -> usize;
}

#[async_trait]
impl FrameSource for Box<dyn FrameSource> {
    async fn next_frame(&mut self) -> AudioResult<AudioFrame> {
        (**self).next_frame().await
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn layout(&self) -> ChannelLayout {
        (**self).layout()
    }

    fn block_size(&self) -> usize {
        (**self).block_size()
    }
}
