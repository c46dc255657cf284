//! Look-ahead scheduling of decoded audio buffers against the audio clock,
//! reconciling active sources every composited frame.
//!
//! One dedicated pump thread per live source, cancellation via a shared
//! flag rather than a per-buffer channel, gated by a playback-epoch counter
//! bumped on every play/pause/seek so stale pumps notice they've been
//! superseded and exit quietly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use framecast_core::{AudioLayer, SourceId};

use super::clock::AudioClock;
use super::graph::{MasterBus, SourceNode};
use super::track::SourceAudioTrack;

/// Drift beyond which `processAudioLayers` treats a layer's `sourceTime` as
/// a seek and restarts the source's iterator.
const DRIFT_THRESHOLD_SECS: f64 = 0.5;
/// `scheduleSourceBuffers` step 3: pace consumption so buffered-ahead stays
/// under this many seconds.
const LOOKAHEAD_THROTTLE_SECS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleDecision {
    Schedule { at_secs: f64 },
    Partial { internal_offset_secs: f64 },
    Drop,
}

/// Pure scheduling arithmetic, factored out of the pump loop so it can be
/// unit tested without spinning up a real thread.
pub fn schedule_decision(
    iterator_start_context_time: f64,
    start_source_time: f64,
    buffer_timestamp: f64,
    buffer_duration: f64,
    now: f64,
) -> ScheduleDecision {
    let offset = buffer_timestamp - start_source_time;
    let scheduled = iterator_start_context_time + offset;
    if scheduled >= now {
        ScheduleDecision::Schedule { at_secs: scheduled }
    } else if now - scheduled < buffer_duration {
        ScheduleDecision::Partial { internal_offset_secs: now - scheduled }
    } else {
        ScheduleDecision::Drop
    }
}

struct ActiveEntry {
    node: Mutex<SourceNode>,
    current_source_time: Mutex<f64>,
    generation: AtomicU64,
}

/// Drives per-source audio playback against an `AudioClock`. Owns no
/// decoder state directly — sources are registered as `SourceAudioTrack`
/// openers and the scheduler spawns one pump thread per active source.
pub struct AudioScheduler {
    clock: Arc<dyn AudioClock>,
    tracks: RwLock<HashMap<SourceId, SourceAudioTrack>>,
    active: Mutex<HashMap<SourceId, Arc<ActiveEntry>>>,
    master: Mutex<MasterBus>,
    epoch: Arc<AtomicU64>,
    playing: AtomicBool,
    start_media_time: Mutex<f64>,
    start_context_time: Mutex<f64>,
    pause_time: Mutex<f64>,
}

impl AudioScheduler {
    pub fn new(clock: Arc<dyn AudioClock>) -> Self {
        Self {
            clock,
            tracks: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            master: Mutex::new(MasterBus::default()),
            epoch: Arc::new(AtomicU64::new(0)),
            playing: AtomicBool::new(false),
            start_media_time: Mutex::new(0.0),
            start_context_time: Mutex::new(0.0),
            pause_time: Mutex::new(0.0),
        }
    }

    pub fn register_source(&self, id: SourceId, track: SourceAudioTrack) {
        self.tracks.write().insert(id, track);
    }

    pub fn unregister_source(&self, id: SourceId) {
        self.tracks.write().remove(&id);
        self.stop_source(id);
    }

    pub fn set_master_volume(&self, v: f64) {
        self.master.lock().volume = v.clamp(0.0, 1.0);
    }

    pub fn set_master_muted(&self, m: bool) {
        self.master.lock().muted = m;
    }

    pub fn get_current_time(&self) -> f64 {
        if self.playing.load(Ordering::SeqCst) {
            *self.start_media_time.lock() + (self.clock.now() - *self.start_context_time.lock())
        } else {
            *self.pause_time.lock()
        }
    }

    /// `play(fromTime)`: bumps the playback epoch (cancelling any stale pump
    /// loop) and records the media/context-time anchor. Does not itself
    /// start any source — the caller drives `startSourcePlayback`.
    pub fn play(&self, from_time: f64) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self.start_media_time.lock() = from_time;
        *self.start_context_time.lock() = self.clock.now();
        self.playing.store(true, Ordering::SeqCst);
    }

    /// `pause()`: stops all queued per-source playback and freezes the
    /// current-time anchor.
    pub fn pause(&self) {
        let t = self.get_current_time();
        self.stop_all();
        *self.pause_time.lock() = t;
        self.playing.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.stop_all();
        *self.pause_time.lock() = 0.0;
        *self.start_media_time.lock() = 0.0;
        self.playing.store(false, Ordering::SeqCst);
    }

    /// `seek(t)`: pause (stopping all queued nodes and closing iterators),
    /// reanchor to `t`, then resume if playback was active.
    pub fn seek(&self, t: f64) {
        let was_playing = self.playing.load(Ordering::SeqCst);
        self.pause();
        *self.pause_time.lock() = t;
        *self.start_media_time.lock() = t;
        if was_playing {
            self.play(t);
        }
    }

    fn stop_all(&self) {
        let mut active = self.active.lock();
        for entry in active.values() {
            entry.generation.fetch_add(1, Ordering::SeqCst);
        }
        active.clear();
    }

    fn stop_source(&self, id: SourceId) {
        if let Some(entry) = self.active.lock().remove(&id) {
            entry.generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// `startSourcePlayback(id, sourceTime)`: spawns the buffer-pump thread
    /// for a source the caller has decided should become active this
    /// frame.
    pub fn start_source_playback(self: &Arc<Self>, layer: &AudioLayer, start_source_time: f64) {
        let Some(track) = self.tracks.read().get(&layer.source_id).cloned() else {
            tracing::warn!(target: "audio", id = %layer.source_id, "start_source_playback: no registered track");
            return;
        };
        let entry = Arc::new(ActiveEntry {
            node: Mutex::new(SourceNode { volume: layer.volume, pan: layer.pan, muted: layer.muted }),
            current_source_time: Mutex::new(start_source_time),
            generation: AtomicU64::new(0),
        });
        self.active.lock().insert(layer.source_id, Arc::clone(&entry));
        self.spawn_pump(entry, track, start_source_time);
    }

    fn spawn_pump(self: &Arc<Self>, entry: Arc<ActiveEntry>, track: SourceAudioTrack, start_source_time: f64) {
        let my_epoch = self.epoch.load(Ordering::SeqCst);
        let my_generation = entry.generation.load(Ordering::SeqCst);
        let scheduler = Arc::clone(self);

        std::thread::spawn(move || {
            let Ok(iterator) = track.open_at(start_source_time) else {
                tracing::warn!(target: "audio", "pump: failed to open audio iterator");
                return;
            };
            let iterator_start_context_time = scheduler.clock.now();

            for buffer in iterator {
                if scheduler.epoch.load(Ordering::SeqCst) != my_epoch
                    || entry.generation.load(Ordering::SeqCst) != my_generation
                {
                    return;
                }

                let now = scheduler.clock.now();
                let decision = schedule_decision(
                    iterator_start_context_time,
                    start_source_time,
                    buffer.timestamp,
                    buffer.duration,
                    now,
                );

                let node = *entry.node.lock();
                let gain = (node.gain() * scheduler.master.lock().gain()) as f32;
                let pan = node.pan();

                match decision {
                    ScheduleDecision::Schedule { at_secs } => {
                        scheduler.clock.schedule(&buffer.data, at_secs, gain, pan);
                    }
                    ScheduleDecision::Partial { internal_offset_secs } => {
                        scheduler.clock.schedule_partial(&buffer.data, internal_offset_secs, gain, pan);
                    }
                    ScheduleDecision::Drop => continue,
                }
                *entry.current_source_time.lock() = buffer.timestamp;

                let offset = buffer.timestamp - start_source_time;
                loop {
                    if scheduler.epoch.load(Ordering::SeqCst) != my_epoch
                        || entry.generation.load(Ordering::SeqCst) != my_generation
                    {
                        return;
                    }
                    let buffered_ahead = offset - (scheduler.clock.now() - iterator_start_context_time);
                    if buffered_ahead <= LOOKAHEAD_THROTTLE_SECS {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
            }
        });
    }

    /// `processAudioLayers(layers, mediaTime)`, called once per composited
    /// frame. Returns the layers that are newly active this frame and still
    /// need `start_source_playback` — the caller drives ordering, applying
    /// state updates for a frame before scheduling any new playback starts
    /// in that same frame.
    pub fn process_audio_layers(&self, layers: &[AudioLayer], media_time: f64) -> Vec<AudioLayer> {
        let active_ids: std::collections::HashSet<SourceId> = layers.iter().map(|l| l.source_id).collect();
        let mut newly_active = Vec::new();

        {
            let active = self.active.lock();
            for layer in layers {
                let clamped = layer.clone().clamped();
                match active.get(&layer.source_id) {
                    Some(entry) => {
                        let updated =
                            SourceNode { volume: clamped.volume, pan: clamped.pan, muted: clamped.muted };
                        let mut node = entry.node.lock();
                        if !node.unchanged(&updated) {
                            *node = updated;
                        }
                        drop(node);
                        let target = layer.source_time.unwrap_or(media_time);
                        let current = *entry.current_source_time.lock();
                        if (target - current).abs() > DRIFT_THRESHOLD_SECS {
                            entry.generation.fetch_add(1, Ordering::SeqCst);
                            *entry.current_source_time.lock() = target;
                            // The restart itself is driven by the caller
                            // re-invoking start_source_playback once it
                            // observes this generation bump; see Compositor.
                        }
                    }
                    None => newly_active.push(clamped),
                }
            }
        }

        let mut active = self.active.lock();
        let stale: Vec<SourceId> = active.keys().filter(|id| !active_ids.contains(id)).copied().collect();
        for id in stale {
            if let Some(entry) = active.remove(&id) {
                entry.generation.fetch_add(1, Ordering::SeqCst);
            }
        }

        newly_active
    }

    /// True while a source is tracked as active (used by the façade to
    /// decide whether a drifted layer needs `start_source_playback` called
    /// again after `process_audio_layers` bumped its generation).
    pub fn is_active(&self, id: SourceId) -> bool {
        self.active.lock().contains_key(&id)
    }

    pub fn source_generation(&self, id: SourceId) -> Option<u64> {
        self.active.lock().get(&id).map(|e| e.generation.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_time_buffer_schedules_at_offset_context_time() {
        let d = schedule_decision(1.000, 5.000, 5.120, 0.020, 1.000);
        assert_eq!(d, ScheduleDecision::Schedule { at_secs: 1.120 });
    }

    #[test]
    fn slightly_late_buffer_schedules_with_internal_offset() {
        let d = schedule_decision(1.000, 5.000, 5.120, 0.020, 1.125);
        match d {
            ScheduleDecision::Partial { internal_offset_secs } => {
                assert!((internal_offset_secs - 0.005).abs() < 1e-9);
            }
            other => panic!("expected Partial, got {other:?}"),
        }
    }

    #[test]
    fn very_late_buffer_is_dropped() {
        let d = schedule_decision(1.000, 5.000, 5.120, 0.020, 1.200);
        assert_eq!(d, ScheduleDecision::Drop);
    }

    #[test]
    fn get_current_time_tracks_clock_after_play() {
        use super::super::clock::test_support::ManualClock;
        let clock = Arc::new(ManualClock::new(1.0));
        let scheduler = Arc::new(AudioScheduler::new(clock.clone()));
        scheduler.play(5.0);
        clock.set(1.25);
        assert!((scheduler.get_current_time() - 5.25).abs() < 1e-9);
    }

    #[test]
    fn pause_then_play_at_same_time_is_idempotent() {
        use super::super::clock::test_support::ManualClock;
        let clock = Arc::new(ManualClock::new(0.0));
        let scheduler = Arc::new(AudioScheduler::new(clock.clone()));
        scheduler.play(2.0);
        clock.set(1.0);
        scheduler.pause();
        let t = scheduler.get_current_time();
        scheduler.play(t);
        assert!((scheduler.get_current_time() - t).abs() < 1e-9);
    }
}
