//! Per-source audio decode: opens an audio stream (standalone file or the
//! embedded track of a video file) and resamples to the engine's fixed
//! internal format so the scheduler never has to special-case source rate.
//!
//! Uses the same resampling shape (`Context::get` + `resampler.run`) and
//! packet/frame pump as the video decode path.

use std::path::{Path, PathBuf};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::{input, sample::Type as SampleType, Sample};
use ffmpeg::media::Type;

/// Every decoded audio buffer is resampled to this rate, interleaved
/// stereo f32 — matching the format `AudioClock`'s output stream plays.
pub const INTERNAL_SAMPLE_RATE: u32 = 48_000;
pub const INTERNAL_CHANNELS: u16 = 2;

/// One decoded, resampled chunk of audio: interleaved stereo f32 samples
/// starting at `timestamp` seconds into the source's own timeline.
pub struct DecodedAudioBuffer {
    pub data: Vec<f32>,
    pub timestamp: f64,
    pub duration: f64,
}

/// Opens fresh decode iterators against a single audio-bearing file. Cheap
/// to clone (just a path); a fresh `ffmpeg::format::context::Input` is
/// opened per iterator rather than sharing one seekable handle across
/// threads.
#[derive(Clone)]
pub struct SourceAudioTrack {
    path: PathBuf,
}

impl SourceAudioTrack {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let ctx = input(path)?;
        ctx.streams()
            .best(Type::Audio)
            .ok_or_else(|| anyhow::anyhow!("no audio stream"))?;
        Ok(Self { path: path.to_path_buf() })
    }

    /// Opens a fresh decode iterator starting at `start_secs` into the
    /// source's own timeline. Used by `scheduleSourceBuffers` to (re)start
    /// playback after `play`, `seek`, or a detected drift.
    pub fn open_at(&self, start_secs: f64) -> anyhow::Result<AudioBufferIterator> {
        let mut ictx = input(&self.path)?;
        let audio_idx = ictx
            .streams()
            .best(Type::Audio)
            .ok_or_else(|| anyhow::anyhow!("no audio stream"))?
            .index();

        let tb = {
            let stream = ictx.stream(audio_idx).unwrap();
            stream.time_base()
        };
        if start_secs > 0.0 {
            let seek_ts = (start_secs * tb.denominator() as f64 / tb.numerator() as f64) as i64;
            let _ = ictx.seek(seek_ts, ..=seek_ts);
        }

        let ictx2 = input(&self.path)?;
        let stream2 = ictx2.stream(audio_idx).unwrap();
        let dec_ctx = ffmpeg::codec::context::Context::from_parameters(stream2.parameters())?;
        let decoder = dec_ctx.decoder().audio()?;

        Ok(AudioBufferIterator {
            ictx,
            decoder,
            audio_idx,
            tb_num: tb.numerator(),
            tb_den: tb.denominator(),
            start_secs,
        })
    }
}

pub struct AudioBufferIterator {
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::audio::Audio,
    audio_idx: usize,
    tb_num: i32,
    tb_den: i32,
    start_secs: f64,
}

impl Iterator for AudioBufferIterator {
    type Item = DecodedAudioBuffer;

    fn next(&mut self) -> Option<Self::Item> {
        for (stream, packet) in self.ictx.packets().flatten() {
            if stream.index() != self.audio_idx {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }
            let mut decoded = ffmpeg::util::frame::Audio::empty();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let pts = decoded.pts().unwrap_or(0);
                let timestamp = (pts as f64 * self.tb_num as f64 / self.tb_den as f64).max(self.start_secs);

                let mut resampler = match ffmpeg::software::resampling::context::Context::get(
                    decoded.format(),
                    decoded.channel_layout(),
                    decoded.rate(),
                    Sample::F32(SampleType::Packed),
                    ffmpeg::util::channel_layout::ChannelLayout::STEREO,
                    INTERNAL_SAMPLE_RATE,
                ) {
                    Ok(r) => r,
                    Err(_) => continue,
                };
                let mut resampled = ffmpeg::util::frame::Audio::empty();
                if resampler.run(&decoded, &mut resampled).is_err() {
                    continue;
                }
                let samples = resampled.samples();
                if samples == 0 {
                    continue;
                }
                let total = samples * INTERNAL_CHANNELS as usize;
                let data_ptr = resampled.data(0).as_ptr() as *const f32;
                let data = unsafe { std::slice::from_raw_parts(data_ptr, total) }.to_vec();
                let duration = samples as f64 / INTERNAL_SAMPLE_RATE as f64;

                return Some(DecodedAudioBuffer { data, timestamp, duration });
            }
        }
        None
    }
}
