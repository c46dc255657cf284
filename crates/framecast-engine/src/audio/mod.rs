//! Audio node graph + scheduler: per-source gain/pan nodes routed through a
//! master bus, and the look-ahead buffer scheduler that drives them against
//! the audio clock.

pub mod clock;
pub mod graph;
pub mod scheduler;
pub mod track;

pub use clock::{AudioClock, CpalAudioClock, NullAudioClock};
pub use graph::{MasterBus, SourceNode};
pub use scheduler::{schedule_decision, AudioScheduler, ScheduleDecision};
pub use track::{DecodedAudioBuffer, SourceAudioTrack};

#[cfg(test)]
pub use clock::test_support;
