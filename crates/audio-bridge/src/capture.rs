use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::debug;

use crate::queue::{BlockConsumer, BlockProducer, block_queue};
use crate::{AudioError, AudioFrame, AudioResult, ChannelLayout, FrameSource, PtsClock};

const IDLE_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub layout: ChannelLayout,
    /// Samples per channel per emitted frame.
    pub block_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            layout: ChannelLayout::Mono,
            block_size: 512,
        }
    }
}

impl CaptureConfig {
    fn validate(&self) -> AudioResult<()> {
        if self.sample_rate == 0 {
            return Err(AudioError::InvalidConfig("sample rate must be positive".into()));
        }
        if self.block_size == 0 {
            return Err(AudioError::InvalidConfig("block size must be positive".into()));
        }
        Ok(())
    }
}

/// Re-chunks driver blocks of arbitrary length into frames of exactly
/// `block_size` samples per channel.
#[derive(Debug)]
pub struct FrameAssembler {
    layout: ChannelLayout,
    sample_rate: u32,
    block_size: usize,
    pending: VecDeque<i16>,
    clock: PtsClock,
}

impl FrameAssembler {
    pub fn new(layout: ChannelLayout, sample_rate: u32, block_size: usize) -> Self {
        Self {
            layout,
            sample_rate,
            block_size,
            pending: VecDeque::with_capacity(block_size * layout.channels() * 2),
            clock: PtsClock::new(),
        }
    }

    pub fn push(&mut self, interleaved: &[i16]) {
        self.pending.extend(interleaved.iter().copied());
    }

    pub fn next_frame(&mut self) -> Option<AudioFrame> {
        let needed = self.block_size * self.layout.channels();
        if self.pending.len() < needed {
            return None;
        }
        let block: Vec<i16> = self.pending.drain(..needed).collect();
        let pts = self.clock.stamp(self.block_size);
        Some(AudioFrame::from_interleaved(
            self.layout,
            self.sample_rate,
            pts,
            &block,
        ))
    }

    /// Interleaved samples waiting for a full frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

/// Frame source fed by a driver-owned callback thread.
///
/// The consumer side never blocks: it drains the mailbox with `try_pop` and
/// yields to the runtime for [`IDLE_POLL`] between empty checks.
pub struct LiveCapture {
    config: CaptureConfig,
    consumer: BlockConsumer,
    assembler: FrameAssembler,
    #[cfg(feature = "live-capture")]
    device: Option<device::CaptureDevice>,
}

impl LiveCapture {
    /// Wraps an existing mailbox. The returned producer belongs to whatever
    /// thread delivers blocks.
    pub fn with_queue(config: CaptureConfig) -> AudioResult<(Self, BlockProducer)> {
        config.validate()?;
        let (producer, consumer) = block_queue();
        let assembler = FrameAssembler::new(config.layout, config.sample_rate, config.block_size);
        Ok((
            Self {
                config,
                consumer,
                assembler,
                #[cfg(feature = "live-capture")]
                device: None,
            },
            producer,
        ))
    }

    /// Opens the default input device and starts streaming into the mailbox.
    #[cfg(feature = "live-capture")]
    pub fn open(config: CaptureConfig) -> AudioResult<Self> {
        let (mut capture, producer) = Self::with_queue(config)?;
        capture.device = Some(device::CaptureDevice::start(&capture.config, producer)?);
        Ok(capture)
    }

    #[cfg(not(feature = "live-capture"))]
    pub fn open(config: CaptureConfig) -> AudioResult<Self> {
        config.validate()?;
        Err(AudioError::HardwareUnavailable(
            "built without the live-capture feature".into(),
        ))
    }

    /// Stops the hardware stream. Safe to call more than once.
    pub fn stop(&mut self) {
        #[cfg(feature = "live-capture")]
        if let Some(mut device) = self.device.take() {
            device.stop();
        }
    }
}

impl Drop for LiveCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
impl FrameSource for LiveCapture {
    async fn next_frame(&mut self) -> AudioResult<AudioFrame> {
        loop {
            if let Some(frame) = self.assembler.next_frame() {
                return Ok(frame);
            }
            match self.consumer.try_pop() {
                Ok(Some(block)) => self.assembler.push(&block),
                Ok(None) => sleep(IDLE_POLL).await,
                Err(err) => {
                    debug!(
                        discarded = self.assembler.buffered(),
                        "capture producer gone; ending source"
                    );
                    return Err(err);
                }
            }
        }
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

#[cfg(feature = "live-capture")]
mod device {
    use std::thread::{self, JoinHandle};

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use crossbeam_channel::{Sender, bounded};
    use tracing::{debug, warn};

    use super::CaptureConfig;
    use crate::queue::BlockProducer;
    use crate::{AudioError, AudioResult};

    /// Owns the cpal stream on a dedicated thread; `cpal::Stream` is not `Send`.
    pub(super) struct CaptureDevice {
        shutdown: Option<Sender<()>>,
        thread: Option<JoinHandle<()>>,
    }

    impl CaptureDevice {
        pub(super) fn start(config: &CaptureConfig, producer: BlockProducer) -> AudioResult<Self> {
            let stream_config = cpal::StreamConfig {
                channels: config.layout.channels() as u16,
                sample_rate: cpal::SampleRate(config.sample_rate),
                buffer_size: cpal::BufferSize::Fixed(config.block_size as u32),
            };
            let (ready_tx, ready_rx) = bounded::<AudioResult<()>>(1);
            let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

            let thread = thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || {
                    let stream = match open_stream(&stream_config, producer) {
                        Ok(stream) => stream,
                        Err(err) => {
                            let _ = ready_tx.send(Err(err));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    // Returns once the handle is dropped or signalled.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    debug!(target = "audio_bridge::capture", "capture stream released");
                })
                .map_err(|err| AudioError::HardwareUnavailable(err.to_string()))?;

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(Self {
                    shutdown: Some(shutdown_tx),
                    thread: Some(thread),
                }),
                Ok(Err(err)) => {
                    let _ = thread.join();
                    Err(err)
                }
                Err(_) => {
                    let _ = thread.join();
                    Err(AudioError::HardwareUnavailable(
                        "capture thread exited before reporting".into(),
                    ))
                }
            }
        }

        pub(super) fn stop(&mut self) {
            if let Some(shutdown) = self.shutdown.take() {
                let _ = shutdown.send(());
            }
            if let Some(thread) = self.thread.take() {
                if thread.join().is_err() {
                    warn!(target = "audio_bridge::capture", "capture thread panicked");
                }
            }
        }
    }

    fn open_stream(
        config: &cpal::StreamConfig,
        producer: BlockProducer,
    ) -> AudioResult<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::HardwareUnavailable("no default input device".into()))?;
        let stream = device
            .build_input_stream(
                config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    producer.push(data);
                },
                |err| warn!(target = "audio_bridge::capture", error = %err, "input stream error"),
                None,
            )
            .map_err(|err| AudioError::HardwareUnavailable(err.to_string()))?;
        stream
            .play()
            .map_err(|err| AudioError::HardwareUnavailable(err.to_string()))?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_waits_for_a_full_block() {
        let mut assembler = FrameAssembler::new(ChannelLayout::Mono, 8_000, 4);
        assembler.push(&[1, 2, 3]);
        assert!(assembler.next_frame().is_none());
        assembler.push(&[4, 5]);
        let frame = assembler.next_frame().unwrap();
        assert_eq!(frame.interleaved(), vec![1, 2, 3, 4]);
        assert_eq!(frame.pts, 0);
        assert_eq!(assembler.buffered(), 1);
    }

    #[test]
    fn assembler_splits_large_blocks_with_gapless_pts() {
        let mut assembler = FrameAssembler::new(ChannelLayout::Stereo, 48_000, 2);
        assembler.push(&[0, 0, 1, 1, 2, 2, 3, 3, 4, 4]);
        let a = assembler.next_frame().unwrap();
        let b = assembler.next_frame().unwrap();
        assert!(assembler.next_frame().is_none());
        assert_eq!((a.pts, b.pts), (0, 2));
        assert_eq!(b.interleaved(), vec![2, 2, 3, 3]);
    }

    #[tokio::test]
    async fn closed_producer_ends_the_source_with_a_partial_block_pending() {
        let config = CaptureConfig {
            sample_rate: 8_000,
            layout: ChannelLayout::Mono,
            block_size: 4,
        };
        let (mut capture, producer) = LiveCapture::with_queue(config).unwrap();
        assert!(producer.push(&[1, 2, 3, 4, 5, 6]));
        drop(producer);

        let frame = capture.next_frame().await.unwrap();
        assert_eq!(frame.interleaved(), vec![1, 2, 3, 4]);
        assert!(matches!(
            capture.next_frame().await,
            Err(AudioError::SourceClosed)
        ));
        assert_eq!(capture.assembler.buffered(), 2);
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let config = CaptureConfig {
            block_size: 0,
            ..CaptureConfig::default()
        };
        assert!(matches!(
            LiveCapture::with_queue(config),
            Err(AudioError::InvalidConfig(_))
        ));
    }
}
