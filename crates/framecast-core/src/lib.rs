//! Pure, serializable data model and math shared by the compositor engine.
//! No I/O, no threads — the engine crate builds the runtime on top of this.

pub mod error;
pub mod events;
pub mod fit;
pub mod surface;
pub mod types;

pub use error::{CompositorError, ErrorCode, Result};
pub use events::Event;
pub use fit::{compute_fit, resolve_transform, DrawInstruction, Rect};
pub use surface::Surface;
pub use types::{
    AudioLayer, CompositionFrame, CompositorState, ExportFormat, ExportOptions, FitMode, Image,
    Layer, SourceId, SourceKind, TextOptions, TextShadow, TextStroke, Transform,
};
