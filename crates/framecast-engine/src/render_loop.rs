//! Render Loop (C6): the display-tick driven state machine. The host
//! drives it by calling `tick(now)` once per vsync, advancing
//! `current_time` by the elapsed delta each frame. This module owns only
//! the clock and the state machine; drawing is the blender's job and audio
//! is the scheduler's, both invoked by the façade once `tick` says so.

use framecast_core::{CompositorError, Event};

/// `{Idle, Configured, Playing, Paused, Seeking, Ended, Disposed}`.
/// `Disposed` is terminal; every other state is reachable from
/// `Configured` onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Configured,
    Playing,
    Paused,
    Seeking,
    Ended,
    Disposed,
}

/// `preview({ duration, getComposition, fps?, loop? })`'s non-callback
/// fields; `getComposition` itself lives at the façade, which owns the
/// client closure.
#[derive(Debug, Clone, Copy)]
pub struct PreviewOptions {
    pub duration: f64,
    pub fps: Option<f64>,
    pub loop_playback: bool,
}

/// What `tick` decided this frame: the resolved current time, whether the
/// caller should actually fetch a composition and draw, and any events to
/// emit (façade forwards these to subscribers).
pub struct TickPlan {
    pub current_time: f64,
    pub should_draw: bool,
    pub events: Vec<Event>,
}

const TIMEUPDATE_INTERVAL_SECS: f64 = 0.1;

pub struct RenderLoop {
    state: LoopState,
    current_time: f64,
    duration: f64,
    fps: Option<f64>,
    loop_playback: bool,
    last_frame_time: Option<f64>,
    last_render_time: f64,
    last_timeupdate_time: f64,
    render_pending: bool,
    queued_play: bool,
    was_playing_before_seek: bool,
    pending_seek_time: f64,
}

impl RenderLoop {
    pub fn new() -> Self {
        Self {
            state: LoopState::Idle,
            current_time: 0.0,
            duration: 0.0,
            fps: None,
            loop_playback: false,
            last_frame_time: None,
            last_render_time: f64::NEG_INFINITY,
            last_timeupdate_time: f64::NEG_INFINITY,
            render_pending: false,
            queued_play: false,
            was_playing_before_seek: false,
            pending_seek_time: 0.0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn playing(&self) -> bool {
        self.state == LoopState::Playing
    }

    pub fn seeking(&self) -> bool {
        self.state == LoopState::Seeking
    }

    /// The clamped target time of an in-flight seek, valid between
    /// `begin_seek` and `complete_seek`. Lets the façade render the target
    /// frame before `currentTime` itself updates.
    pub fn pending_seek_time(&self) -> f64 {
        self.pending_seek_time
    }

    fn ensure_usable(&self) -> framecast_core::Result<()> {
        if self.state == LoopState::Disposed {
            return Err(CompositorError::invalid_state("compositor disposed"));
        }
        Ok(())
    }

    /// `preview(...)`: required before `play`/`seek`. Valid from any
    /// non-disposed state; always lands in `Configured`.
    pub fn preview(&mut self, opts: PreviewOptions) -> framecast_core::Result<()> {
        self.ensure_usable()?;
        self.duration = opts.duration.max(0.0);
        self.fps = opts.fps.filter(|f| *f > 0.0);
        self.loop_playback = opts.loop_playback;
        self.current_time = 0.0;
        self.last_frame_time = None;
        self.last_render_time = f64::NEG_INFINITY;
        self.last_timeupdate_time = f64::NEG_INFINITY;
        self.render_pending = false;
        self.queued_play = false;
        self.state = LoopState::Configured;
        Ok(())
    }

    /// `play()`. A call arriving during `Seeking` is queued and executed by
    /// `complete_seek` once `seeked` fires. `Ended` is a valid source state
    /// for a fresh `play()`, which restarts from the beginning.
    pub fn play(&mut self) -> framecast_core::Result<Vec<Event>> {
        self.ensure_usable()?;
        match self.state {
            LoopState::Idle => Err(CompositorError::invalid_state("preview() must be called before play()")),
            LoopState::Seeking => {
                self.queued_play = true;
                Ok(Vec::new())
            }
            LoopState::Playing => Ok(Vec::new()),
            LoopState::Configured | LoopState::Paused | LoopState::Ended => {
                if self.state == LoopState::Ended {
                    self.current_time = 0.0;
                }
                self.state = LoopState::Playing;
                Ok(vec![Event::Play])
            }
            LoopState::Disposed => unreachable!("ensure_usable already errored"),
        }
    }

    /// `pause()`. A queued `play` during an in-flight seek is simply
    /// forgotten; no event fires since playback never started.
    pub fn pause(&mut self) -> framecast_core::Result<Vec<Event>> {
        self.ensure_usable()?;
        match self.state {
            LoopState::Playing => {
                self.state = LoopState::Paused;
                Ok(vec![Event::Pause])
            }
            LoopState::Seeking => {
                self.queued_play = false;
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Begins a seek: clamps `t` into `[0, duration]`, records whether
    /// playback was active, and transitions to `Seeking`. Pair with
    /// `complete_seek` once the new frame is ready.
    pub fn begin_seek(&mut self, t: f64) -> framecast_core::Result<Vec<Event>> {
        self.ensure_usable()?;
        if self.state == LoopState::Idle {
            return Err(CompositorError::invalid_state("preview() must be called before seek()"));
        }
        let clamped = t.clamp(0.0, self.duration.max(0.0));
        self.was_playing_before_seek = self.state == LoopState::Playing;
        self.pending_seek_time = clamped;
        self.state = LoopState::Seeking;
        Ok(vec![Event::Seeking { time: clamped }])
    }

    /// Completes a seek begun with `begin_seek`: sets `currentTime`, emits
    /// `seeked`, then resolves to `Playing`/`Paused`/`Ended` — seeking
    /// exactly to `duration` with looping off emits `seeked` followed by
    /// `ended`.
    pub fn complete_seek(&mut self) -> Vec<Event> {
        let t = self.pending_seek_time;
        self.current_time = t;
        let mut events = vec![Event::Seeked { time: t }];

        let at_end = self.duration.is_finite() && t >= self.duration && self.duration > 0.0;
        if at_end && !self.loop_playback {
            self.state = LoopState::Ended;
            events.push(Event::Ended);
        } else if self.queued_play || self.was_playing_before_seek {
            self.state = LoopState::Playing;
            if self.queued_play {
                events.push(Event::Play);
            }
        } else {
            self.state = LoopState::Paused;
        }
        self.queued_play = false;
        events
    }

    /// Convenience for hosts that don't need the two-phase seek (no real
    /// async latency between `begin_seek` and `complete_seek` at this
    /// layer — the decoder-side cost is absorbed inside `getFrameAt`).
    pub fn seek(&mut self, t: f64) -> framecast_core::Result<Vec<Event>> {
        let mut events = self.begin_seek(t)?;
        events.extend(self.complete_seek());
        Ok(events)
    }

    pub fn dispose(&mut self) {
        self.state = LoopState::Disposed;
    }

    /// Marks a render in flight; `tick` will skip drawing (but keep
    /// advancing the clock and pumping audio) while this is set, guarding
    /// against re-entrant `render` calls overlapping a slow draw.
    pub fn begin_render(&mut self) {
        self.render_pending = true;
    }

    pub fn end_render(&mut self) {
        self.render_pending = false;
    }

    pub fn render_pending(&self) -> bool {
        self.render_pending
    }

    /// One display tick. `now` is host-monotonic seconds (any fixed
    /// epoch). Advances the clock when `Playing`, applies the FPS
    /// throttle and overlap guard to `should_draw`, and emits `timeupdate`
    /// at most every 100 ms regardless of render cadence.
    pub fn tick(&mut self, now: f64) -> TickPlan {
        let mut events = Vec::new();
        let dt = match self.last_frame_time {
            Some(last) => (now - last).max(0.0),
            None => 0.0,
        };
        self.last_frame_time = Some(now);

        if self.state == LoopState::Playing {
            self.current_time += dt;
            let overflowed = self.duration.is_finite() && self.current_time >= self.duration && self.duration > 0.0;
            if overflowed {
                if self.loop_playback {
                    self.current_time = 0.0;
                } else {
                    self.current_time = self.duration;
                    self.state = LoopState::Ended;
                    events.push(Event::Ended);
                }
            }
        }

        if now - self.last_timeupdate_time >= TIMEUPDATE_INTERVAL_SECS {
            self.last_timeupdate_time = now;
            events.push(Event::TimeUpdate { current_time: self.current_time });
        }

        let fps_throttled = match self.fps {
            Some(fps) => (now - self.last_render_time) < 1.0 / fps,
            None => false,
        };
        let drawable_state = matches!(
            self.state,
            LoopState::Configured | LoopState::Playing | LoopState::Paused | LoopState::Seeking | LoopState::Ended
        );
        let should_draw = drawable_state && !self.render_pending && !fps_throttled;
        if should_draw {
            self.last_render_time = now;
        }

        TickPlan { current_time: self.current_time, should_draw, events }
    }
}

impl Default for RenderLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(duration: f64, loop_playback: bool) -> RenderLoop {
        let mut rl = RenderLoop::new();
        rl.preview(PreviewOptions { duration, fps: None, loop_playback }).unwrap();
        rl
    }

    #[test]
    fn play_before_preview_is_invalid_state() {
        let mut rl = RenderLoop::new();
        assert!(rl.play().is_err());
    }

    #[test]
    fn seek_clamps_into_duration_and_emits_seeked() {
        let mut rl = configured(10.0, false);
        let events = rl.seek(100.0).unwrap();
        assert_eq!(rl.current_time(), 10.0);
        assert!(matches!(events[0], Event::Seeked { time } if time == 10.0));
    }

    #[test]
    fn seek_to_duration_with_no_loop_emits_seeked_then_ended() {
        let mut rl = configured(10.0, false);
        let events = rl.seek(10.0).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::Seeked { .. }));
        assert!(matches!(events[1], Event::Ended));
        assert_eq!(rl.state(), LoopState::Ended);
    }

    #[test]
    fn play_queued_during_seek_executes_after_complete_seek() {
        let mut rl = configured(10.0, false);
        rl.begin_seek(5.0).unwrap();
        let played = rl.play().unwrap();
        assert!(played.is_empty());
        assert_eq!(rl.state(), LoopState::Seeking);
        let events = rl.complete_seek();
        assert_eq!(rl.state(), LoopState::Playing);
        assert!(events.iter().any(|e| matches!(e, Event::Play)));
    }

    #[test]
    fn ended_allows_reentrant_play_restarting_from_zero() {
        let mut rl = configured(2.0, false);
        rl.play().unwrap();
        let plan = rl.tick(0.0);
        assert!(plan.should_draw);
        let plan = rl.tick(5.0);
        assert_eq!(rl.state(), LoopState::Ended);
        assert!(plan.events.iter().any(|e| matches!(e, Event::Ended)));
        rl.play().unwrap();
        assert_eq!(rl.state(), LoopState::Playing);
        assert_eq!(rl.current_time(), 0.0);
    }

    #[test]
    fn looped_playback_wraps_instead_of_ending() {
        let mut rl = configured(2.0, true);
        rl.play().unwrap();
        rl.tick(0.0);
        let plan = rl.tick(3.0);
        assert_eq!(rl.state(), LoopState::Playing);
        assert!(plan.current_time < 2.0);
    }

    #[test]
    fn render_pending_skips_draw_but_clock_still_advances() {
        let mut rl = configured(10.0, false);
        rl.play().unwrap();
        rl.tick(0.0);
        rl.begin_render();
        let plan = rl.tick(0.5);
        assert!(!plan.should_draw);
        assert!((plan.current_time - 0.5).abs() < 1e-9);
    }

    #[test]
    fn timeupdate_emitted_at_most_every_hundred_ms() {
        let mut rl = configured(10.0, false);
        rl.play().unwrap();
        let plan0 = rl.tick(0.0);
        assert!(plan0.events.iter().any(|e| matches!(e, Event::TimeUpdate { .. })));
        let plan1 = rl.tick(0.05);
        assert!(!plan1.events.iter().any(|e| matches!(e, Event::TimeUpdate { .. })));
        let plan2 = rl.tick(0.2);
        assert!(plan2.events.iter().any(|e| matches!(e, Event::TimeUpdate { .. })));
    }

    #[test]
    fn fps_throttle_skips_draw_between_intervals() {
        let mut rl = configured(10.0, false);
        rl.fps = Some(10.0);
        rl.play().unwrap();
        let plan0 = rl.tick(0.0);
        assert!(plan0.should_draw);
        let plan1 = rl.tick(0.05);
        assert!(!plan1.should_draw);
        let plan2 = rl.tick(0.2);
        assert!(plan2.should_draw);
    }
}
