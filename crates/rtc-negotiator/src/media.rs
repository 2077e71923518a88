use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use audio_bridge::codec::PCMU_RATE;
use audio_bridge::{FrameSource, PcmuEncoder, ulaw_decode};
use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::MediaError;

/// Static RTP payload type for PCMU.
const PCMU_PAYLOAD_TYPE: u8 = 0;
const WAV_FLUSH_EVERY: u64 = 50;

/// Feeds frames from `source` into `track` until the source ends or the track
/// rejects a write.
pub fn spawn_audio_pump<S>(
    mut source: S,
    track: Arc<TrackLocalStaticSample>,
) -> Result<JoinHandle<()>, MediaError>
where
    S: FrameSource + 'static,
{
    let mut encoder = PcmuEncoder::new(source.sample_rate())?;
    Ok(tokio::spawn(async move {
        let mut sent: u64 = 0;
        loop {
            let frame = match source.next_frame().await {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(target = "rtc_negotiator::media", error = %err, "audio source ended");
                    break;
                }
            };
            let payload = encoder.encode(&frame);
            if payload.is_empty() {
                continue;
            }
            let sample = Sample {
                duration: Duration::from_secs_f64(payload.len() as f64 / PCMU_RATE as f64),
                data: Bytes::from(payload),
                ..Default::default()
            };
            if let Err(err) = track.write_sample(&sample).await {
                warn!(target = "rtc_negotiator::media", error = %err, "audio track write failed");
                break;
            }
            sent += 1;
            if sent % 500 == 0 {
                trace!(target = "rtc_negotiator::media", frames = sent, pts = frame.pts, "audio pump progress");
            }
        }
        debug!(target = "rtc_negotiator::media", frames = sent, "audio pump stopped");
    }))
}

pub fn wav_spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate: PCMU_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Writes μ-law payloads to a 16-bit mono WAV file.
pub struct WavRecorder {
    path: PathBuf,
    writer: hound::WavWriter<std::io::BufWriter<std::fs::File>>,
    packets: u64,
    samples: u64,
}

impl WavRecorder {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, MediaError> {
        let path = path.as_ref().to_path_buf();
        let writer = hound::WavWriter::create(&path, wav_spec())?;
        Ok(Self {
            path,
            writer,
            packets: 0,
            samples: 0,
        })
    }

    pub fn write_ulaw(&mut self, payload: &[u8]) -> Result<(), MediaError> {
        for byte in payload {
            self.writer.write_sample(ulaw_decode(*byte))?;
        }
        self.samples += payload.len() as u64;
        self.packets += 1;
        if self.packets % WAV_FLUSH_EVERY == 0 {
            self.writer.flush()?;
        }
        Ok(())
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn finish(self) -> Result<u64, MediaError> {
        self.writer.finalize()?;
        info!(
            target = "rtc_negotiator::media",
            path = %self.path.display(),
            samples = self.samples,
            "recording saved"
        );
        Ok(self.samples)
    }
}

/// Records an inbound PCMU track until it ends.
pub fn spawn_recorder(track: Arc<TrackRemote>, mut recorder: WavRecorder) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok((packet, _)) = track.read_rtp().await {
            if packet.header.payload_type != PCMU_PAYLOAD_TYPE {
                trace!(
                    target = "rtc_negotiator::media",
                    payload_type = packet.header.payload_type,
                    "skipping non-pcmu packet"
                );
                continue;
            }
            if let Err(err) = recorder.write_ulaw(&packet.payload) {
                warn!(target = "rtc_negotiator::media", error = %err, "recording write failed");
                break;
            }
        }
        if let Err(err) = recorder.finish() {
            warn!(target = "rtc_negotiator::media", error = %err, "recording finalize failed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_bridge::{
        CaptureConfig, ChannelLayout, LiveCapture, SweepConfig, SweepGenerator, ulaw_encode,
    };
    use webrtc::api::media_engine::MIME_TYPE_PCMU;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

    fn pcmu_track() -> Arc<TrackLocalStaticSample> {
        Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: 8_000,
                channels: 1,
                ..Default::default()
            },
            "audio".to_owned(),
            "test".to_owned(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn pump_keeps_sending_until_aborted() {
        let sweep = SweepGenerator::new(SweepConfig::default()).unwrap();
        let pump = spawn_audio_pump(sweep, pcmu_track()).unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!pump.is_finished());

        pump.abort();
        let err = pump.await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn pump_stops_when_the_capture_queue_closes() {
        let config = CaptureConfig {
            sample_rate: 8_000,
            layout: ChannelLayout::Mono,
            block_size: 160,
        };
        let (capture, producer) = LiveCapture::with_queue(config).unwrap();
        assert!(producer.push(&[0i16; 480]));
        let pump = spawn_audio_pump(capture, pcmu_track()).unwrap();

        drop(producer);
        tokio::time::timeout(Duration::from_secs(5), pump)
            .await
            .expect("pump finished")
            .unwrap();
    }

    #[test]
    fn recorder_writes_decoded_pcm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("received.wav");

        let mut recorder = WavRecorder::create(&path).unwrap();
        let payload: Vec<u8> = [0i16, 1_000, -1_000, 8_000]
            .iter()
            .map(|s| ulaw_encode(*s))
            .collect();
        recorder.write_ulaw(&payload).unwrap();
        assert_eq!(recorder.finish().unwrap(), 4);

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec(), wav_spec());
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        let expected: Vec<i16> = payload.iter().map(|b| ulaw_decode(*b)).collect();
        assert_eq!(samples, expected);
    }
}
