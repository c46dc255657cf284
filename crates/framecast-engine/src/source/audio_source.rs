//! Audio-only source: no video track, `getFrameAt` always returns `None`.
//! Unlike the video source's embedded audio (best-effort), failure to
//! decode an explicit audio load is fatal — there is nothing else for the
//! load to fall back to.

use std::path::{Path, PathBuf};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use ffmpeg::media::Type;

use framecast_core::{CompositorError, ErrorCode};

use crate::audio::SourceAudioTrack;

pub struct AudioSource {
    pub path: PathBuf,
    pub duration: f64,
    pub track: SourceAudioTrack,
}

impl AudioSource {
    pub fn open(path: PathBuf) -> framecast_core::Result<Self> {
        let ctx = input(&path)
            .map_err(|e| CompositorError::wrap(ErrorCode::MediaLoadFailed, "failed to open audio", &e.into()))?;
        let stream = ctx.streams().best(Type::Audio).ok_or_else(|| {
            CompositorError::new(ErrorCode::MediaNotSupported, "no audio track in source")
        })?;

        let duration = {
            let top = ctx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;
            if top > 0.0 {
                top
            } else {
                let tb = stream.time_base();
                stream.duration() as f64 * tb.numerator() as f64 / tb.denominator() as f64
            }
        };
        drop(ctx);

        let track = SourceAudioTrack::open(&path)
            .map_err(|e| CompositorError::wrap(ErrorCode::DecodeError, "failed to decode audio", &e))?;

        Ok(Self { path, duration, track })
    }

    pub fn get_frame_at(&self, _t: f64) -> Option<framecast_core::Image> {
        None
    }
}

impl AsRef<Path> for AudioSource {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}
