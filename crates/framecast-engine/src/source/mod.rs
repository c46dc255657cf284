//! The four source variants as a closed tagged sum type with a fixed method
//! table rather than open inheritance — there will only ever be these four
//! kinds, so dynamic dispatch would buy nothing.

pub mod audio_source;
pub mod image;
pub mod text;
pub mod video;

use std::path::PathBuf;

use framecast_core::{CompositorError, ErrorCode, Image, SourceKind, TextOptions};

use crate::audio::SourceAudioTrack;
use audio_source::AudioSource;
use image::ImageSource;
use text::TextSource;
use video::VideoSource;

/// A concrete media input, resolved once at load time. `Bytes` is
/// materialized to a temp file so the ffmpeg path-based API can reopen it
/// for seeks without re-buffering.
pub enum MediaInput {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl MediaInput {
    /// Resolves to a filesystem path, keeping a `NamedTempFile` alive for
    /// the `Bytes` case so the caller can stash it alongside the source.
    fn resolve(self, suffix: &str) -> framecast_core::Result<(PathBuf, Option<tempfile::NamedTempFile>)> {
        match self {
            MediaInput::Path(p) => Ok((p, None)),
            MediaInput::Bytes(bytes) => {
                let tmp = tempfile::Builder::new()
                    .suffix(suffix)
                    .tempfile()
                    .map_err(|e| CompositorError::wrap(ErrorCode::MediaLoadFailed, "failed to buffer media bytes", &e.into()))?;
                std::fs::write(tmp.path(), &bytes)
                    .map_err(|e| CompositorError::wrap(ErrorCode::MediaLoadFailed, "failed to buffer media bytes", &e.into()))?;
                let path = tmp.path().to_path_buf();
                Ok((path, Some(tmp)))
            }
        }
    }
}

/// One loaded media asset, owned exclusively by the source pool. Layers
/// never hold this directly — only a `SourceId`.
pub enum Source {
    Video { source: VideoSource, _temp: Option<tempfile::NamedTempFile> },
    Image { source: ImageSource },
    Audio { source: AudioSource, _temp: Option<tempfile::NamedTempFile> },
    Text { source: TextSource },
}

impl Source {
    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Video { .. } => SourceKind::Video,
            Source::Image { .. } => SourceKind::Image,
            Source::Audio { .. } => SourceKind::Audio,
            Source::Text { .. } => SourceKind::Text,
        }
    }

    /// Intrinsic width; 0 for audio.
    pub fn width(&self) -> u32 {
        match self {
            Source::Video { source, .. } => source.width,
            Source::Image { source } => source.image.width,
            Source::Audio { .. } => 0,
            Source::Text { source } => source.image.width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Source::Video { source, .. } => source.height,
            Source::Image { source } => source.image.height,
            Source::Audio { .. } => 0,
            Source::Text { source } => source.image.height,
        }
    }

    /// Duration in seconds; infinite for image/text.
    pub fn duration(&self) -> f64 {
        match self {
            Source::Video { source, .. } => source.duration,
            Source::Image { .. } => f64::INFINITY,
            Source::Audio { source, .. } => source.duration,
            Source::Text { .. } => f64::INFINITY,
        }
    }

    pub fn get_frame_at(&self, t: f64) -> Option<Image> {
        match self {
            Source::Video { source, .. } => source.get_frame_at(t),
            Source::Image { source } => source.get_frame_at(t),
            Source::Audio { source, .. } => source.get_frame_at(t),
            Source::Text { source } => source.get_frame_at(t),
        }
    }

    pub fn has_audio(&self) -> bool {
        match self {
            Source::Video { source, .. } => source.audio.is_some(),
            Source::Audio { .. } => true,
            Source::Image { .. } | Source::Text { .. } => false,
        }
    }

    /// The audio track opener for sources that have one, for registration
    /// with the `AudioScheduler`.
    pub fn audio_track(&self) -> Option<SourceAudioTrack> {
        match self {
            Source::Video { source, .. } => source.audio.clone(),
            Source::Audio { source, .. } => Some(source.track.clone()),
            Source::Image { .. } | Source::Text { .. } => None,
        }
    }

    pub fn thumbnail(&self) -> Option<&Image> {
        match self {
            Source::Video { source, .. } => source.thumbnail.as_ref(),
            _ => None,
        }
    }

    pub fn dispose(&self) {
        if let Source::Video { source, .. } = self {
            source.dispose();
        }
    }
}

pub(crate) fn open_video(input: MediaInput) -> framecast_core::Result<Source> {
    let (path, temp) = input.resolve(".bin")?;
    let source = VideoSource::open(path)?;
    Ok(Source::Video { source, _temp: temp })
}

pub(crate) fn open_audio(input: MediaInput) -> framecast_core::Result<Source> {
    let (path, temp) = input.resolve(".bin")?;
    let source = AudioSource::open(path)?;
    Ok(Source::Audio { source, _temp: temp })
}

pub(crate) fn open_image(input: MediaInput) -> framecast_core::Result<Source> {
    let source = match input {
        MediaInput::Path(p) => ImageSource::decode(&p)?,
        MediaInput::Bytes(b) => ImageSource::from_bytes(&b)?,
    };
    Ok(Source::Image { source })
}

pub(crate) fn open_text(opts: &TextOptions) -> framecast_core::Result<Source> {
    let source = TextSource::rasterize(opts)?;
    Ok(Source::Text { source })
}
