use ffmpeg_next::format::sample::Type as SampleType;
use ffmpeg_next::format::{Pixel, Sample};
use ffmpeg_next::frame;
use ffmpeg_next::software::resampling::Context as SamplerContext;
use ffmpeg_next::software::scaling::context::Context as Scaler;
use ffmpeg_next::software::scaling::flag::Flags;
use ffmpeg_next::ChannelLayout;
use tracing::debug;

use crate::event::{PcmChunk, VideoImage};

/// Converts decoded audio frames to playback-ready PCM: interleaved signed
/// 16-bit samples at the source rate and channel layout.
///
/// Planar f32 input (the usual AAC decoder output) takes an explicit
/// interleave-and-scale pass; anything else goes through a swresample
/// context, which is kept and reused while the source format, layout and
/// rate stay unchanged.
pub struct SampleConverter {
    resampler: Option<(SamplerKey, SamplerContext)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SamplerKey {
    format: Sample,
    layout: ChannelLayout,
    rate: u32,
}

impl Default for SampleConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleConverter {
    pub fn new() -> Self {
        SampleConverter { resampler: None }
    }

    pub fn convert(&mut self, frame: &frame::Audio) -> Result<PcmChunk, ffmpeg_next::Error> {
        if frame.format() == Sample::F32(SampleType::Planar) {
            Ok(interleave_f32_planar(frame))
        } else {
            self.resample_to_s16(frame)
        }
    }

    fn resample_to_s16(&mut self, frame: &frame::Audio) -> Result<PcmChunk, ffmpeg_next::Error> {
        let key = SamplerKey {
            format: frame.format(),
            layout: frame.channel_layout(),
            rate: frame.rate(),
        };

        let rebuild = match &self.resampler {
            Some((current, _)) => *current != key,
            None => true,
        };
        if rebuild {
            debug!(format = ?key.format, rate = key.rate, "creating audio resampling context");
            let context = SamplerContext::get(
                key.format,
                key.layout,
                key.rate,
                Sample::I16(SampleType::Packed),
                key.layout,
                key.rate,
            )?;
            self.resampler = Some((key, context));
        }

        let (_, resampler) = self.resampler.as_mut().expect("resampler just installed");
        let mut converted = frame::Audio::empty();
        resampler.run(frame, &mut converted)?;

        let channels = converted.channels() as usize;
        let byte_len = converted.samples() * channels * 2;
        Ok(PcmChunk {
            data: converted.data(0)[..byte_len].to_vec(),
            sample_rate: frame.rate(),
            channels: channels as u16,
        })
    }
}

/// Interleave planar f32 channels and scale each sample into i16 range:
/// clamp to +/-32767 (saturation, never wraparound), then round with a +0.5
/// bias before truncation.
fn interleave_f32_planar(frame: &frame::Audio) -> PcmChunk {
    let samples = frame.samples();
    let channels = frame.channels() as usize;

    let mut data = Vec::with_capacity(samples * channels * 2);
    for i in 0..samples {
        for c in 0..channels {
            let sample = scale_to_i16(frame.plane::<f32>(c)[i]);
            data.extend_from_slice(&sample.to_le_bytes());
        }
    }

    PcmChunk {
        data,
        sample_rate: frame.rate(),
        channels: channels as u16,
    }
}

fn scale_to_i16(value: f32) -> i16 {
    let scaled = (value * 32767.0).clamp(-32767.0, 32767.0);
    (scaled + 0.5).floor() as i16
}

/// Converts one decoded video frame into a tightly-packed RGBA preview
/// image of the same dimensions.
///
/// A fresh scaling context is built per frame; preview frame rates are
/// moderate enough that the simplicity wins. Construction failure drops the
/// frame and never touches the remux path.
pub struct PixelConverter;

impl PixelConverter {
    pub fn convert(&self, frame: &frame::Video) -> Result<VideoImage, ffmpeg_next::Error> {
        let width = frame.width();
        let height = frame.height();

        let mut scaler = Scaler::get(
            frame.format(),
            width,
            height,
            Pixel::RGBA,
            width,
            height,
            Flags::BILINEAR,
        )?;

        let mut rgba = frame::Video::empty();
        scaler.run(frame, &mut rgba)?;

        // Drop the stride padding so the consumer sees width*height*4 bytes.
        let stride = rgba.stride(0);
        let row_bytes = width as usize * 4;
        let plane = rgba.data(0);
        let mut data = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            data.extend_from_slice(&plane[start..start + row_bytes]);
        }

        Ok(VideoImage {
            data,
            width,
            height,
        })
    }
}
