//! Image source: a single immutable decoded bitmap. Duration is infinite —
//! a still image never runs out of frames.

use std::path::Path;

use framecast_core::{CompositorError, ErrorCode, Image};

pub struct ImageSource {
    pub image: Image,
}

impl ImageSource {
    pub fn decode(path: &Path) -> framecast_core::Result<Self> {
        let img = image::open(path)
            .map_err(|e| CompositorError::wrap(ErrorCode::DecodeError, "failed to decode image", &e.into()))?
            .into_rgba8();
        let (width, height) = (img.width(), img.height());
        Ok(Self { image: Image { width, height, rgba: img.into_raw() } })
    }

    pub fn from_bytes(bytes: &[u8]) -> framecast_core::Result<Self> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| CompositorError::wrap(ErrorCode::DecodeError, "failed to decode image", &e.into()))?
            .into_rgba8();
        let (width, height) = (img.width(), img.height());
        Ok(Self { image: Image { width, height, rgba: img.into_raw() } })
    }

    pub fn get_frame_at(&self, _t: f64) -> Option<Image> {
        Some(self.image.clone())
    }
}
