//! The data model: source ids, composition frames, layers, fit/transform
//! fields and compositor state. No I/O, no threads — just the shapes that
//! cross the pool/blender/scheduler boundaries.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque handle to a source owned exclusively by the source pool. Layers
/// hold this, never a reference into the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub Uuid);

impl SourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tag distinguishing the four source variants (a closed sum type, not open
/// inheritance — see the design notes on dynamic dispatch across variants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Video,
    Image,
    Audio,
    Text,
}

/// Fit policy mapping a source's intrinsic size onto the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    Fill,
    Cover,
    Contain,
    /// Defers to the compositor's global fit mode.
    Auto,
}

impl Default for FitMode {
    fn default() -> Self {
        FitMode::Contain
    }
}

/// Per-layer position/size/rotation/opacity, applied after fit computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    pub x: f64,
    pub y: f64,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub rotation: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub opacity: f64,
    pub anchor_x: f64,
    pub anchor_y: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: None,
            height: None,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            opacity: 1.0,
            anchor_x: 0.5,
            anchor_y: 0.5,
        }
    }
}

/// One layer in a composition frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub source_id: SourceId,
    /// Time within the source's own timeline; defaults to the frame's time.
    pub source_time: Option<f64>,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub fit_mode: FitMode,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub z_index: i32,
}

fn default_true() -> bool {
    true
}

/// Per-frame audio layer: source + volume/pan/mute, independent of the
/// visual layer list (a source can appear in one, both, or neither).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioLayer {
    pub source_id: SourceId,
    pub source_time: Option<f64>,
    pub volume: f64,
    pub pan: f64,
    pub muted: bool,
}

impl AudioLayer {
    pub fn clamped(mut self) -> Self {
        self.volume = self.volume.clamp(0.0, 1.0);
        self.pan = self.pan.clamp(-1.0, 1.0);
        self
    }
}

/// The per-tick immutable description of what to draw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionFrame {
    pub time: f64,
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub audio: Vec<AudioLayer>,
}

/// Public, read-only snapshot of the render loop's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositorState {
    pub playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub seeking: bool,
}

impl CompositorState {
    pub fn new(duration: f64) -> Self {
        Self { playing: false, current_time: 0.0, duration, seeking: false }
    }
}

/// Decoded image bytes handed back by `getFrameAt`: tightly packed RGBA8.
#[derive(Debug, Clone)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Image {
    pub fn blank(width: u32, height: u32) -> Self {
        Self { width, height, rgba: vec![0; (width as usize) * (height as usize) * 4] }
    }
}

/// Opaque image-encoding request for `exportFrame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Png,
    Jpeg,
    Webp,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// `[0, 1]`, only meaningful for lossy formats.
    pub quality: Option<f64>,
}

/// A drop shadow behind rasterized text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TextShadow {
    pub color: [u8; 4],
    pub offset_x: f64,
    pub offset_y: f64,
    pub blur: f64,
}

/// An outline stroke around rasterized text glyphs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TextStroke {
    pub color: [u8; 4],
    pub width: f64,
}

/// `loadText` options: font, weight, size, color, stroke, shadow,
/// background, line-wrap at `maxWidth`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextOptions {
    pub text: String,
    pub font_family: Option<String>,
    /// CSS-style numeric weight, e.g. 400 regular / 700 bold.
    pub weight: u16,
    pub size: f64,
    pub color: [u8; 4],
    pub stroke: Option<TextStroke>,
    pub shadow: Option<TextShadow>,
    pub background: Option<[u8; 4]>,
    pub max_width: Option<f64>,
    pub line_height: Option<f64>,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            text: String::new(),
            font_family: None,
            weight: 400,
            size: 32.0,
            color: [255, 255, 255, 255],
            stroke: None,
            shadow: None,
            background: None,
            max_width: None,
            line_height: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// These types are `serde`-derived because they're the shapes a worker
    /// implementation would serialize across a real process boundary; this
    /// round-trip is the contract that matters, independent of which
    /// transport a given host chooses.
    #[test]
    fn composition_frame_round_trips_through_json() {
        let frame = CompositionFrame {
            time: 1.5,
            layers: vec![Layer {
                source_id: SourceId::new(),
                source_time: Some(0.75),
                transform: Transform::default(),
                fit_mode: FitMode::Cover,
                visible: true,
                z_index: 3,
            }],
            audio: vec![AudioLayer { source_id: SourceId::new(), source_time: None, volume: 0.8, pan: -0.2, muted: false }],
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: CompositionFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.time, frame.time);
        assert_eq!(back.layers.len(), 1);
        assert_eq!(back.layers[0].z_index, 3);
        assert_eq!(back.audio[0].volume, 0.8);
    }

    #[test]
    fn layer_defaults_apply_when_fields_are_omitted() {
        let json = r#"{"sourceId":"00000000-0000-0000-0000-000000000000","sourceTime":null}"#;
        let layer: Layer = serde_json::from_str(json).unwrap();
        assert!(layer.visible);
        assert_eq!(layer.z_index, 0);
        assert_eq!(layer.fit_mode, FitMode::Contain);
    }

    #[test]
    fn layer_serializes_with_camel_case_field_names() {
        let layer = Layer {
            source_id: SourceId::new(),
            source_time: None,
            transform: Transform::default(),
            fit_mode: FitMode::Auto,
            visible: true,
            z_index: 5,
        };
        let json = serde_json::to_string(&layer).unwrap();
        assert!(json.contains("\"sourceId\""));
        assert!(json.contains("\"zIndex\":5"));
        assert!(json.contains("\"scaleX\""));
    }
}
