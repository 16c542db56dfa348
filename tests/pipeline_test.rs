use ffmpeg_next::format::sample::Type as SampleType;
use ffmpeg_next::format::{Pixel, Sample};
use ffmpeg_next::{frame, ChannelLayout};

use rtmp_ingest::{PixelConverter, SampleConverter, SpectralEstimator, FFT_SIZE};

fn fltp_frame(samples: usize, fill: f32) -> frame::Audio {
    let mut frame = frame::Audio::new(Sample::F32(SampleType::Planar), samples, ChannelLayout::STEREO);
    frame.set_rate(48000);
    for channel in 0..2 {
        frame.plane_mut::<f32>(channel).fill(fill);
    }
    frame
}

/// The audio preview path end to end: decoded planar frames through the
/// sample converter, PCM bytes through the spectral estimator.
#[test]
fn audio_frames_drive_expected_spectrum_window_count() {
    ffmpeg_next::init().unwrap();

    let mut converter = SampleConverter::new();
    let mut estimator = SpectralEstimator::new();

    // 1024 stereo samples yield 4096 PCM bytes: exactly one window each.
    let frame = fltp_frame(1024, 0.1);
    let mut windows = 0;
    let mut total_bytes = 0;
    for _ in 0..10 {
        let chunk = converter.convert(&frame).unwrap();
        assert_eq!(chunk.data.len(), 1024 * 2 * 2);
        assert_eq!(chunk.sample_rate, 48000);
        assert_eq!(chunk.channels, 2);
        total_bytes += chunk.data.len();
        windows += estimator.feed(&chunk.data).len();
    }

    assert_eq!(windows, total_bytes / FFT_SIZE);
}

#[test]
fn spectrum_snapshots_are_half_spectrum_and_finite() {
    ffmpeg_next::init().unwrap();

    let mut converter = SampleConverter::new();
    let mut estimator = SpectralEstimator::new();

    let frame = fltp_frame(2048, -0.5);
    let chunk = converter.convert(&frame).unwrap();
    let frames = estimator.feed(&chunk.data);
    assert_eq!(frames.len(), 2);
    for spectrum in frames {
        assert_eq!(spectrum.peak.len(), FFT_SIZE / 2);
        assert_eq!(spectrum.smoothed.len(), FFT_SIZE / 2);
        assert!(spectrum.peak.iter().all(|v| v.is_finite()));
        assert!(spectrum.smoothed.iter().all(|v| v.is_finite()));
    }
}

#[test]
fn pixel_converter_produces_packed_rgba_of_same_dimensions() {
    ffmpeg_next::init().unwrap();

    let mut frame = frame::Video::new(Pixel::YUV420P, 64, 48);
    frame.data_mut(0).fill(128);
    frame.data_mut(1).fill(64);
    frame.data_mut(2).fill(192);

    let image = PixelConverter.convert(&frame).unwrap();
    assert_eq!(image.width, 64);
    assert_eq!(image.height, 48);
    assert_eq!(image.data.len(), 64 * 48 * 4);
}
