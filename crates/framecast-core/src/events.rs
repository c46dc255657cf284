//! The façade's event map. Subscribers register via `on`/`once`/`off`
//! (see `framecast_engine::Compositor`); this enum is the payload shape.

use crate::error::CompositorError;
use crate::types::SourceId;

/// A subset of these cross the worker boundary as JSON (see the worker
/// protocol's response envelope); most are consumed in-process by façade
/// subscribers, so this stays a plain enum rather than a `serde` payload.
#[derive(Debug, Clone)]
pub enum Event {
    Play,
    Pause,
    Seeking { time: f64 },
    Seeked { time: f64 },
    TimeUpdate { current_time: f64 },
    Ended,
    Error { error: CompositorError },
    SourceLoaded { id: SourceId },
    SourceUnloaded { id: SourceId },
    CompositionChange,
}
