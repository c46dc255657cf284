//! The audio clock and mixing destination: the monotonic wall-clock domain
//! every per-source scheduling time is expressed in, backed by a real
//! `cpal` output stream.
//!
//! The scheduler never touches samples directly — it calls `schedule` /
//! `schedule_partial` with a gain/pan already resolved, and this module
//! mixes additively into a ring buffer the output callback drains.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;

use super::graph::pan_gains;
use super::track::INTERNAL_CHANNELS;

/// Everything the scheduler needs from "the audio backend": a current time
/// and a place to mix scheduled buffers in.
pub trait AudioClock: Send + Sync {
    fn now(&self) -> f64;

    /// Mixes `samples` (interleaved stereo f32) into the destination so
    /// playback starts at `at_secs` in this clock's domain.
    fn schedule(&self, samples: &[f32], at_secs: f64, gain: f32, pan: f64);

    /// Mixes `samples` starting `internal_offset_secs` into the buffer,
    /// to begin immediately — the "scheduled late but still within one
    /// buffer duration" case.
    fn schedule_partial(&self, samples: &[f32], internal_offset_secs: f64, gain: f32, pan: f64);
}

const RING_SECONDS: f64 = 2.0;

struct Ring {
    data: Vec<f32>,
    capacity_frames: usize,
}

impl Ring {
    fn new(sample_rate: u32) -> Self {
        let capacity_frames = (sample_rate as f64 * RING_SECONDS) as usize;
        Self { data: vec![0.0; capacity_frames * INTERNAL_CHANNELS as usize], capacity_frames }
    }

    /// Additively mixes `samples` (interleaved stereo) into the ring so
    /// that sample 0 lands at absolute frame `start_frame`. `base_frame`
    /// is the absolute frame index the consumer is currently at; frames
    /// already behind `base_frame` are dropped (silently — the caller is
    /// responsible for the "more than one buffer late" drop decision).
    fn mix_in(&mut self, samples: &[f32], start_frame: i64, base_frame: i64, gain: f32, pan: f64) {
        let (lg, rg) = pan_gains(pan);
        let n_frames = samples.len() / INTERNAL_CHANNELS as usize;
        for i in 0..n_frames {
            let frame = start_frame + i as i64;
            if frame < base_frame {
                continue;
            }
            let idx = (frame.rem_euclid(self.capacity_frames as i64)) as usize;
            self.data[idx * 2] += samples[i * 2] * gain * lg;
            self.data[idx * 2 + 1] += samples[i * 2 + 1] * gain * rg;
        }
    }

    /// Drains `n_frames` starting at `base_frame` into `out`, zeroing the
    /// ring slots behind it so a future wraparound doesn't replay stale
    /// audio.
    fn drain(&mut self, base_frame: i64, out: &mut [f32]) {
        let n_frames = out.len() / INTERNAL_CHANNELS as usize;
        for i in 0..n_frames {
            let frame = base_frame + i as i64;
            let idx = (frame.rem_euclid(self.capacity_frames as i64)) as usize;
            out[i * 2] = self.data[idx * 2];
            out[i * 2 + 1] = self.data[idx * 2 + 1];
            self.data[idx * 2] = 0.0;
            self.data[idx * 2 + 1] = 0.0;
        }
    }
}

/// Real-time clock driven by an open `cpal` output stream.
pub struct CpalAudioClock {
    _stream: cpal::Stream,
    sample_rate: u32,
    base_frame: Arc<AtomicI64>,
    ring: Arc<Mutex<Ring>>,
}

impl CpalAudioClock {
    pub fn open() -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no default audio output device"))?;
        let config = device.default_output_config()?;
        let sample_rate = config.sample_rate().0;

        let ring = Arc::new(Mutex::new(Ring::new(sample_rate)));
        let base_frame = Arc::new(AtomicI64::new(0));

        let stream_ring = Arc::clone(&ring);
        let stream_base = Arc::clone(&base_frame);
        let channels = config.channels() as usize;

        let stream = device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels.max(1);
                let mut stereo = vec![0.0f32; frames * INTERNAL_CHANNELS as usize];
                let base = stream_base.load(Ordering::Acquire);
                stream_ring.lock().drain(base, &mut stereo);
                stream_base.store(base + frames as i64, Ordering::Release);

                for (frame_idx, chunk) in data.chunks_mut(channels.max(1)).enumerate() {
                    let l = stereo[frame_idx * 2];
                    let r = stereo.get(frame_idx * 2 + 1).copied().unwrap_or(l);
                    for (c, sample) in chunk.iter_mut().enumerate() {
                        *sample = if c % 2 == 0 { l } else { r };
                    }
                }
            },
            move |err| tracing::error!(target: "audio", %err, "cpal output stream error"),
            None,
        )?;
        stream.play()?;

        Ok(Self { _stream: stream, sample_rate, base_frame, ring })
    }
}

impl AudioClock for CpalAudioClock {
    fn now(&self) -> f64 {
        self.base_frame.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn schedule(&self, samples: &[f32], at_secs: f64, gain: f32, pan: f64) {
        let start_frame = (at_secs * self.sample_rate as f64).round() as i64;
        let base = self.base_frame.load(Ordering::Acquire);
        self.ring.lock().mix_in(samples, start_frame, base, gain, pan);
    }

    fn schedule_partial(&self, samples: &[f32], internal_offset_secs: f64, gain: f32, pan: f64) {
        let skip_frames = (internal_offset_secs * self.sample_rate as f64).round() as usize;
        let skip_samples = skip_frames * INTERNAL_CHANNELS as usize;
        if skip_samples >= samples.len() {
            return;
        }
        let base = self.base_frame.load(Ordering::Acquire);
        self.ring.lock().mix_in(&samples[skip_samples..], base, base, gain, pan);
    }
}

/// Software fallback when no audio output device is available. Playback
/// continues silently (video only) rather than failing outright, with a
/// warning logged at construction.
pub struct NullAudioClock {
    start: std::time::Instant,
}

impl NullAudioClock {
    pub fn new() -> Self {
        Self { start: std::time::Instant::now() }
    }
}

impl Default for NullAudioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for NullAudioClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn schedule(&self, _samples: &[f32], _at_secs: f64, _gain: f32, _pan: f64) {}

    fn schedule_partial(&self, _samples: &[f32], _internal_offset_secs: f64, _gain: f32, _pan: f64) {}
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::atomic::AtomicU64;

    /// A manually-advanced clock that records what was scheduled instead
    /// of mixing real samples, used to test the scheduling arithmetic in
    /// `scheduler.rs` without an audio device.
    pub struct ManualClock {
        now_bits: AtomicU64,
        pub events: Mutex<Vec<ScheduleEvent>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum ScheduleEvent {
        Scheduled { at_secs: f64, len: usize },
        Partial { internal_offset_secs: f64, len: usize },
    }

    impl ManualClock {
        pub fn new(now: f64) -> Self {
            Self { now_bits: AtomicU64::new(now.to_bits()), events: Mutex::new(Vec::new()) }
        }

        pub fn set(&self, t: f64) {
            self.now_bits.store(t.to_bits(), Ordering::SeqCst);
        }
    }

    impl AudioClock for ManualClock {
        fn now(&self) -> f64 {
            f64::from_bits(self.now_bits.load(Ordering::SeqCst))
        }

        fn schedule(&self, samples: &[f32], at_secs: f64, _gain: f32, _pan: f64) {
            self.events.lock().push(ScheduleEvent::Scheduled { at_secs, len: samples.len() });
        }

        fn schedule_partial(&self, samples: &[f32], internal_offset_secs: f64, _gain: f32, _pan: f64) {
            self.events
                .lock()
                .push(ScheduleEvent::Partial { internal_offset_secs, len: samples.len() });
        }
    }
}
