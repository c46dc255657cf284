// crates/framecast-engine/src/lib.rs
//
// Everything with a pulse: source pool, decoders, audio graph/scheduler,
// layer blender, render loop, worker protocol, compositor façade.

pub mod audio;
pub mod blender;
pub mod compositor;
pub mod pool;
pub mod render_loop;
pub mod source;
pub mod worker;

pub use compositor::{Compositor, EventKind};
pub use pool::{SourceInfo, SourcePool};
pub use render_loop::{LoopState, PreviewOptions, RenderLoop};
pub use source::MediaInput;
pub use worker::CompositorWorker;
