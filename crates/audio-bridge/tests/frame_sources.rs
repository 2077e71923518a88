use std::thread;
use std::time::Duration;

use audio_bridge::{
    AudioError, CaptureConfig, ChannelLayout, FrameSource, LiveCapture, SweepConfig,
    SweepGenerator,
};
use tokio::time::Instant;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn collect(source: &mut dyn FrameSource, count: usize) -> Vec<audio_bridge::AudioFrame> {
    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        frames.push(source.next_frame().await.expect("frame"));
    }
    frames
}

#[tokio::test(start_paused = true)]
async fn sweep_frames_are_paced_and_gapless() {
    init_tracing();
    let mut sweep = SweepGenerator::new(SweepConfig::default()).expect("sweep");
    let block = sweep.block_size() as i64;
    let started = Instant::now();

    let frames = collect(&mut sweep, 4).await;

    assert!(started.elapsed() >= Duration::from_secs_f64(4.0 * 1024.0 / 48_000.0));
    for pair in frames.windows(2) {
        assert_eq!(pair[1].pts, pair[0].pts + block);
    }
    assert!(frames.iter().all(|f| f.samples == 1024));
}

#[tokio::test]
async fn live_capture_reassembles_irregular_driver_blocks() {
    init_tracing();
    let config = CaptureConfig {
        sample_rate: 8_000,
        layout: ChannelLayout::Stereo,
        block_size: 160,
    };
    let (mut capture, producer) = LiveCapture::with_queue(config).expect("capture");

    // Five frames' worth of stereo samples, delivered in uneven driver chunks.
    let total = 160 * 2 * 5;
    let driver = thread::spawn(move || {
        let samples: Vec<i16> = (0..total as i32).map(|n| (n % 30_000) as i16).collect();
        for chunk in samples.chunks(217) {
            assert!(producer.push(chunk));
            thread::sleep(Duration::from_millis(2));
        }
        producer
    });

    let frames = collect(&mut capture, 5).await;
    let producer = driver.join().expect("driver thread");

    let mut expected = 0i32;
    for (index, frame) in frames.iter().enumerate() {
        assert_eq!(frame.pts, index as i64 * 160);
        assert_eq!(frame.samples, 160);
        for sample in frame.interleaved() {
            assert_eq!(sample as i32, expected % 30_000);
            expected += 1;
        }
    }

    drop(producer);
    assert!(matches!(
        capture.next_frame().await,
        Err(AudioError::SourceClosed)
    ));
}

#[tokio::test]
async fn boxed_sources_share_one_contract() {
    let (capture, producer) = LiveCapture::with_queue(CaptureConfig {
        block_size: 4,
        ..CaptureConfig::default()
    })
    .expect("capture");
    producer.push(&[1, 2, 3, 4]);

    let mut sources: Vec<Box<dyn FrameSource>> = vec![
        Box::new(capture),
        Box::new(
            SweepGenerator::new(SweepConfig {
                block_size: 4,
                sweep: Duration::from_millis(10),
                ..SweepConfig::default()
            })
            .expect("sweep"),
        ),
    ];

    for source in sources.iter_mut() {
        let frame = source.next_frame().await.expect("frame");
        assert_eq!(frame.samples, source.block_size());
        assert_eq!(frame.sample_rate, source.sample_rate());
        assert_eq!(frame.layout, source.layout());
    }
}
