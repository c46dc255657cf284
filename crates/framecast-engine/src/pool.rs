//! Source Pool (C1): owns every loaded media source and hands out opaque
//! `SourceId` handles. A single owner behind an id-addressed map — callers
//! never get a live reference, only ids and snapshots — since decode here
//! is driven synchronously by `getFrameAt` calls rather than a background
//! pipeline.

use std::collections::HashMap;

use parking_lot::RwLock;

use framecast_core::{CompositorError, ErrorCode, Image, SourceId, SourceKind, TextOptions};

use crate::source::{self, MediaInput, Source};

/// The pool's public snapshot of a loaded source, returned by `get_source`
/// / `get_all_sources` without exposing the internal enum's decode state.
#[derive(Debug, Clone, Copy)]
pub struct SourceInfo {
    pub id: SourceId,
    pub kind: SourceKind,
    pub width: u32,
    pub height: u32,
    pub duration: f64,
    pub has_audio: bool,
}

/// Owns every loaded source. Sources are stored behind an `RwLock` keyed by
/// id; callers never see a reference into the map, only ids and
/// `SourceInfo` snapshots.
pub struct SourcePool {
    sources: RwLock<HashMap<SourceId, Source>>,
}

impl SourcePool {
    pub fn new() -> Self {
        Self { sources: RwLock::new(HashMap::new()) }
    }

    /// Opens `input` as a video source, selecting the first video track.
    /// Fails with `MediaNotSupported`/`DecodeError`; resolves only once
    /// duration/width/height are known, since `VideoSource::open` probes
    /// metadata synchronously before returning.
    pub fn load_video(&self, input: MediaInput) -> framecast_core::Result<SourceId> {
        let source = source::open_video(input)?;
        let id = SourceId::new();
        self.sources.write().insert(id, source);
        Ok(id)
    }

    /// Decodes `input` into an immutable image; duration is infinite.
    pub fn load_image(&self, input: MediaInput) -> framecast_core::Result<SourceId> {
        let source = source::open_image(input)?;
        let id = SourceId::new();
        self.sources.write().insert(id, source);
        Ok(id)
    }

    /// Like `load_video` but audio-only; unlike the video loader's
    /// best-effort audio, failure to decode here is fatal.
    pub fn load_audio(&self, input: MediaInput) -> framecast_core::Result<SourceId> {
        let source = source::open_audio(input)?;
        let id = SourceId::new();
        self.sources.write().insert(id, source);
        Ok(id)
    }

    /// Rasterizes `opts` into a text bitmap source.
    pub fn load_text(&self, opts: &TextOptions) -> framecast_core::Result<SourceId> {
        let source = source::open_text(opts)?;
        let id = SourceId::new();
        self.sources.write().insert(id, source);
        Ok(id)
    }

    /// Re-rasterizes an existing text source in place, keeping its id (and
    /// therefore every layer referencing it) valid.
    pub fn update_text(&self, id: SourceId, opts: &TextOptions) -> framecast_core::Result<()> {
        let source = source::open_text(opts)?;
        let mut map = self.sources.write();
        if !map.contains_key(&id) {
            return Err(Self::unknown_source_error(id));
        }
        map.insert(id, source);
        Ok(())
    }

    /// Disposes the source, revoking any in-flight decoder under its own
    /// lock first. Returns whether it existed.
    pub fn unload_source(&self, id: SourceId) -> bool {
        let removed = self.sources.write().remove(&id);
        match removed {
            Some(source) => {
                source.dispose();
                true
            }
            None => false,
        }
    }

    pub fn get_source(&self, id: SourceId) -> Option<SourceInfo> {
        self.sources.read().get(&id).map(|s| SourceInfo {
            id,
            kind: s.kind(),
            width: s.width(),
            height: s.height(),
            duration: s.duration(),
            has_audio: s.has_audio(),
        })
    }

    pub fn get_all_sources(&self) -> Vec<SourceInfo> {
        self.sources
            .read()
            .iter()
            .map(|(&id, s)| SourceInfo {
                id,
                kind: s.kind(),
                width: s.width(),
                height: s.height(),
                duration: s.duration(),
                has_audio: s.has_audio(),
            })
            .collect()
    }

    /// Disposes every source and empties the map, without tearing down the
    /// pool itself (unlike `dispose`, the pool remains usable afterward).
    pub fn clear(&self) {
        let mut map = self.sources.write();
        for source in map.values() {
            source.dispose();
        }
        map.clear();
    }

    /// Terminal: disposes every source and drops them. The pool itself may
    /// still be called into afterward, but every lookup will miss — callers
    /// at the façade layer guard this with `InvalidState` after `dispose()`.
    pub fn dispose(&self) {
        self.clear();
    }

    pub fn get_frame_at(&self, id: SourceId, t: f64) -> Option<Image> {
        self.sources.read().get(&id)?.get_frame_at(t)
    }

    pub fn thumbnail(&self, id: SourceId) -> Option<Image> {
        self.sources.read().get(&id)?.thumbnail().cloned()
    }

    pub fn audio_track(&self, id: SourceId) -> Option<crate::audio::SourceAudioTrack> {
        self.sources.read().get(&id)?.audio_track()
    }

    pub fn has_audio(&self, id: SourceId) -> bool {
        self.sources.read().get(&id).map(|s| s.has_audio()).unwrap_or(false)
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.sources.read().contains_key(&id)
    }

    pub fn unknown_source_error(id: SourceId) -> CompositorError {
        CompositorError::new(ErrorCode::UnknownError, format!("unknown source: {id}"))
    }
}

impl Default for SourcePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unload_on_unknown_id_returns_false() {
        let pool = SourcePool::new();
        assert!(!pool.unload_source(SourceId::new()));
    }

    #[test]
    fn clear_leaves_pool_usable_and_empty() {
        let pool = SourcePool::new();
        pool.clear();
        assert!(pool.get_all_sources().is_empty());
    }

    #[test]
    fn get_source_on_unknown_id_is_none() {
        let pool = SourcePool::new();
        assert!(pool.get_source(SourceId::new()).is_none());
    }
}
