//! Compositor Façade (C8): the public surface everything else in this crate
//! exists to back. Owns the source pool, audio scheduler, render loop and
//! drawing surface, and fans events out to subscribers — the in-process
//! analogue of what the worker protocol (`worker.rs`) exposes across a
//! channel boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use image::{ExtendedColorType, ImageEncoder};
use parking_lot::Mutex;

use framecast_core::{
    CompositionFrame, CompositorError, ErrorCode, Event, ExportFormat, ExportOptions, FitMode, SourceId, Surface,
};

use crate::audio::{AudioClock, AudioScheduler, CpalAudioClock, NullAudioClock};
use crate::pool::{SourceInfo, SourcePool};
use crate::render_loop::{LoopState, PreviewOptions, RenderLoop};
use crate::source::MediaInput;

/// Event names subscribers register against — the payload-free shadow of
/// [`Event`], since `on`/`off` key by kind rather than by a concrete value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Play,
    Pause,
    Seeking,
    Seeked,
    TimeUpdate,
    Ended,
    Error,
    SourceLoaded,
    SourceUnloaded,
    CompositionChange,
}

fn kind_of(event: &Event) -> EventKind {
    match event {
        Event::Play => EventKind::Play,
        Event::Pause => EventKind::Pause,
        Event::Seeking { .. } => EventKind::Seeking,
        Event::Seeked { .. } => EventKind::Seeked,
        Event::TimeUpdate { .. } => EventKind::TimeUpdate,
        Event::Ended => EventKind::Ended,
        Event::Error { .. } => EventKind::Error,
        Event::SourceLoaded { .. } => EventKind::SourceLoaded,
        Event::SourceUnloaded { .. } => EventKind::SourceUnloaded,
        Event::CompositionChange => EventKind::CompositionChange,
    }
}

type Callback = Box<dyn Fn(&Event) + Send>;

struct Listener {
    id: u64,
    once: bool,
    callback: Callback,
}

type CompositionProvider = Box<dyn Fn(f64) -> CompositionFrame + Send>;

/// Owns C1–C6 in-process. `Compositor::new` opens a real `cpal` output
/// device; `with_audio_clock` injects one for headless tests (the same
/// dependency-injection shape `AudioScheduler`'s own tests use with
/// `ManualClock`).
pub struct Compositor {
    pool: Arc<SourcePool>,
    audio: Arc<AudioScheduler>,
    render_loop: Mutex<RenderLoop>,
    surface: Mutex<Surface>,
    background: Mutex<[u8; 4]>,
    fit_mode: Mutex<FitMode>,
    composition: Mutex<Option<CompositionProvider>>,
    listeners: Mutex<HashMap<EventKind, Vec<Listener>>>,
    next_listener_id: AtomicU64,
    drift_generations: Mutex<HashMap<SourceId, u64>>,
    disposed: AtomicBool,
}

impl Compositor {
    /// Opens the default audio output device; if none is available, falls
    /// back to a silent clock rather than failing construction outright
    /// (see `NullAudioClock`).
    pub fn new(width: u32, height: u32) -> Self {
        let clock: Arc<dyn AudioClock> = match CpalAudioClock::open() {
            Ok(clock) => Arc::new(clock),
            Err(error) => {
                tracing::warn!(target: "audio", %error, "no audio output device available; continuing with video only");
                Arc::new(NullAudioClock::new())
            }
        };
        Self::with_audio_clock(width, height, clock)
    }

    pub fn with_audio_clock(width: u32, height: u32, clock: Arc<dyn AudioClock>) -> Self {
        Self {
            pool: Arc::new(SourcePool::new()),
            audio: Arc::new(AudioScheduler::new(clock)),
            render_loop: Mutex::new(RenderLoop::new()),
            surface: Mutex::new(Surface::new(width, height)),
            background: Mutex::new([0, 0, 0, 255]),
            fit_mode: Mutex::new(FitMode::Contain),
            composition: Mutex::new(None),
            listeners: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            drift_generations: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        }
    }

    fn ensure_not_disposed(&self) -> framecast_core::Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(CompositorError::invalid_state("compositor has been disposed"));
        }
        Ok(())
    }

    // ── Event subscription ────────────────────────────────────────────────

    pub fn on(&self, kind: EventKind, callback: impl Fn(&Event) + Send + 'static) -> u64 {
        self.add_listener(kind, callback, false)
    }

    pub fn once(&self, kind: EventKind, callback: impl Fn(&Event) + Send + 'static) -> u64 {
        self.add_listener(kind, callback, true)
    }

    fn add_listener(&self, kind: EventKind, callback: impl Fn(&Event) + Send + 'static, once: bool) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .entry(kind)
            .or_default()
            .push(Listener { id, once, callback: Box::new(callback) });
        id
    }

    pub fn off(&self, listener_id: u64) {
        for listeners in self.listeners.lock().values_mut() {
            listeners.retain(|l| l.id != listener_id);
        }
    }

    fn emit(&self, event: Event) {
        let kind = kind_of(&event);
        let mut listeners = self.listeners.lock();
        if let Some(list) = listeners.get_mut(&kind) {
            for listener in list.iter() {
                (listener.callback)(&event);
            }
            list.retain(|l| !l.once);
        }
    }

    fn emit_all(&self, events: Vec<Event>) {
        for event in events {
            self.emit(event);
        }
    }

    // ── Source loading ────────────────────────────────────────────────────

    pub fn load_video(&self, input: MediaInput) -> framecast_core::Result<SourceId> {
        self.ensure_not_disposed()?;
        let id = self.pool.load_video(input)?;
        self.register_audio_if_present(id);
        self.emit(Event::SourceLoaded { id });
        Ok(id)
    }

    pub fn load_image(&self, input: MediaInput) -> framecast_core::Result<SourceId> {
        self.ensure_not_disposed()?;
        let id = self.pool.load_image(input)?;
        self.emit(Event::SourceLoaded { id });
        Ok(id)
    }

    pub fn load_audio(&self, input: MediaInput) -> framecast_core::Result<SourceId> {
        self.ensure_not_disposed()?;
        let id = self.pool.load_audio(input)?;
        self.register_audio_if_present(id);
        self.emit(Event::SourceLoaded { id });
        Ok(id)
    }

    pub fn load_text(&self, opts: &framecast_core::TextOptions) -> framecast_core::Result<SourceId> {
        self.ensure_not_disposed()?;
        let id = self.pool.load_text(opts)?;
        self.emit(Event::SourceLoaded { id });
        Ok(id)
    }

    fn register_audio_if_present(&self, id: SourceId) {
        if let Some(track) = self.pool.audio_track(id) {
            self.audio.register_source(id, track);
        }
    }

    pub fn unload_source(&self, id: SourceId) -> bool {
        if self.disposed.load(Ordering::SeqCst) {
            return false;
        }
        self.audio.unregister_source(id);
        self.drift_generations.lock().remove(&id);
        let removed = self.pool.unload_source(id);
        if removed {
            self.emit(Event::SourceUnloaded { id });
        }
        removed
    }

    pub fn source_info(&self, id: SourceId) -> Option<SourceInfo> {
        self.pool.get_source(id)
    }

    pub fn source_known(&self, id: SourceId) -> bool {
        self.pool.contains(id)
    }

    pub fn update_text(&self, id: SourceId, opts: &framecast_core::TextOptions) -> framecast_core::Result<()> {
        self.ensure_not_disposed()?;
        self.pool.update_text(id, opts)?;
        self.emit(Event::CompositionChange);
        Ok(())
    }

    // ── Playback control ──────────────────────────────────────────────────

    pub fn preview<F>(&self, duration: f64, get_composition: F, fps: Option<f64>, loop_playback: bool) -> framecast_core::Result<()>
    where
        F: Fn(f64) -> CompositionFrame + Send + 'static,
    {
        self.ensure_not_disposed()?;
        self.render_loop.lock().preview(PreviewOptions { duration, fps, loop_playback })?;
        *self.composition.lock() = Some(Box::new(get_composition));
        Ok(())
    }

    pub fn play(&self) -> framecast_core::Result<()> {
        self.ensure_not_disposed()?;
        let (events, current_time) = {
            let mut rl = self.render_loop.lock();
            let events = rl.play()?;
            (events, rl.current_time())
        };
        if events.iter().any(|e| matches!(e, Event::Play)) {
            self.audio.play(current_time);
        }
        self.emit_all(events);
        Ok(())
    }

    pub fn pause(&self) -> framecast_core::Result<()> {
        self.ensure_not_disposed()?;
        let events = self.render_loop.lock().pause()?;
        if events.iter().any(|e| matches!(e, Event::Pause)) {
            self.audio.pause();
        }
        self.emit_all(events);
        Ok(())
    }

    /// Seeks to `t`, rendering the destination frame synchronously before
    /// `seeked` fires (so a paused scrub is never left showing a stale
    /// frame).
    pub fn seek(&self, t: f64) -> framecast_core::Result<()> {
        self.ensure_not_disposed()?;
        let begin_events = self.render_loop.lock().begin_seek(t)?;
        self.emit_all(begin_events);

        let target = self.render_loop.lock().pending_seek_time();
        self.audio.seek(target);
        if let Some(provider) = self.composition.lock().as_ref() {
            let frame = provider(target);
            self.draw_frame(&frame);
        }

        let complete_events = self.render_loop.lock().complete_seek();
        self.emit_all(complete_events);
        Ok(())
    }

    pub fn current_time(&self) -> f64 {
        self.render_loop.lock().current_time()
    }

    pub fn duration(&self) -> f64 {
        self.render_loop.lock().duration()
    }

    pub fn playing(&self) -> bool {
        self.render_loop.lock().playing()
    }

    pub fn seeking(&self) -> bool {
        self.render_loop.lock().seeking()
    }

    pub fn state(&self) -> LoopState {
        self.render_loop.lock().state()
    }

    /// One display tick. The host calls this once per vsync (or at a fixed
    /// rate in a headless pipeline); it advances the clock, fetches a fresh
    /// composition when a draw is due, and fans out any state-machine
    /// events — the façade's half of `render_loop::tick`.
    pub fn tick(&self, now: f64) -> framecast_core::Result<()> {
        self.ensure_not_disposed()?;
        let plan = self.render_loop.lock().tick(now);
        self.emit_all(plan.events);
        if plan.should_draw {
            if let Some(provider) = self.composition.lock().as_ref() {
                let frame = provider(plan.current_time);
                self.draw_frame(&frame);
            }
        }
        Ok(())
    }

    /// `render(frame)`: one-shot draw outside the tick loop. Returns
    /// `false` if a render was already in flight (the same `render_pending`
    /// overlap guard the tick loop uses).
    pub fn render(&self, frame: &CompositionFrame) -> bool {
        if self.disposed.load(Ordering::SeqCst) {
            return false;
        }
        let drawn = self.draw_frame(frame);
        if drawn {
            self.emit(Event::CompositionChange);
        }
        drawn
    }

    fn draw_frame(&self, frame: &CompositionFrame) -> bool {
        {
            let mut rl = self.render_loop.lock();
            if rl.render_pending() {
                return false;
            }
            rl.begin_render();
        }

        {
            let mut surface = self.surface.lock();
            let background = *self.background.lock();
            let fit = *self.fit_mode.lock();
            crate::blender::render(frame, &mut surface, self.pool.as_ref(), background, fit);
        }

        // Audio state updates precede scheduling new playback starts within
        // the same frame, so a source that both stops and restarts this
        // tick never double-schedules.
        let newly_active = self.audio.process_audio_layers(&frame.audio, frame.time);
        for layer in &newly_active {
            let t = layer.source_time.unwrap_or(frame.time);
            self.audio.start_source_playback(layer, t);
            self.drift_generations.lock().insert(layer.source_id, 0);
        }
        for layer in &frame.audio {
            let Some(generation) = self.audio.source_generation(layer.source_id) else { continue };
            let mut seen = self.drift_generations.lock();
            let last = seen.get(&layer.source_id).copied().unwrap_or(0);
            if generation != last {
                seen.insert(layer.source_id, generation);
                drop(seen);
                let t = layer.source_time.unwrap_or(frame.time);
                self.audio.start_source_playback(layer, t);
            }
        }

        self.render_loop.lock().end_render();
        true
    }

    // ── Surface / fit / volume ────────────────────────────────────────────

    pub fn clear(&self) -> framecast_core::Result<()> {
        self.ensure_not_disposed()?;
        let background = *self.background.lock();
        self.surface.lock().clear(background);
        Ok(())
    }

    pub fn resize(&self, width: u32, height: u32, fit: Option<FitMode>) -> framecast_core::Result<()> {
        self.ensure_not_disposed()?;
        self.surface.lock().resize(width, height);
        if let Some(fit) = fit {
            *self.fit_mode.lock() = fit;
        }
        Ok(())
    }

    pub fn set_fit_mode(&self, fit: FitMode) {
        *self.fit_mode.lock() = fit;
    }

    pub fn fit_mode(&self) -> FitMode {
        *self.fit_mode.lock()
    }

    pub fn set_background(&self, rgba: [u8; 4]) {
        *self.background.lock() = rgba;
    }

    pub fn set_volume(&self, v: f64) {
        self.audio.set_master_volume(v);
    }

    pub fn set_muted(&self, m: bool) {
        self.audio.set_master_muted(m);
    }

    /// Copies the current surface contents out; mainly useful for tests and
    /// hosts that render into their own presentation path.
    pub fn surface_snapshot(&self) -> Surface {
        self.surface.lock().clone()
    }

    /// Renders the composition at `t` synchronously via the stored
    /// composition provider and encodes it. Serializes through the render
    /// loop's `render_pending` guard like any other draw, so an export
    /// never races a concurrent `render`/`tick`.
    pub fn export_frame(&self, t: f64, opts: ExportOptions) -> framecast_core::Result<Vec<u8>> {
        self.ensure_not_disposed()?;
        let provider = self.composition.lock();
        let Some(provider) = provider.as_ref() else {
            return Err(CompositorError::invalid_state("preview() must be called before exportFrame()"));
        };
        let frame = provider(t);
        drop(provider);
        self.export_composition_frame(&frame, opts)
    }

    /// Renders a caller-supplied `CompositionFrame` directly and encodes it,
    /// bypassing the stored composition provider — the worker boundary never
    /// has a provider to call (§4.5: its `exportFrame` payload carries the
    /// frame, not just a time), so it calls this instead of `export_frame`.
    pub fn export_composition_frame(&self, frame: &CompositionFrame, opts: ExportOptions) -> framecast_core::Result<Vec<u8>> {
        self.ensure_not_disposed()?;
        if !self.draw_frame(frame) {
            return Err(CompositorError::new(ErrorCode::PlaybackError, "a render was already in progress"));
        }
        let surface = self.surface.lock();
        encode_image(&surface, &opts)
    }

    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.render_loop.lock().dispose();
        self.audio.stop();
        self.pool.dispose();
        self.listeners.lock().clear();
        *self.composition.lock() = None;
    }
}

fn encode_image(surface: &Surface, opts: &ExportOptions) -> framecast_core::Result<Vec<u8>> {
    if let ExportFormat::Png = opts.format {
        // Raw `png::Encoder` over a buffer rather than the `image` crate's
        // PNG codec, which this module otherwise reserves for the lossy
        // formats (JPEG, WebP).
        return encode_png(surface);
    }

    let mut buf = Vec::new();
    let result = match opts.format {
        ExportFormat::Png => unreachable!("handled above"),
        ExportFormat::Jpeg => {
            let rgb: Vec<u8> = surface.rgba.chunks_exact(4).flat_map(|p| [p[0], p[1], p[2]]).collect();
            let quality = (opts.quality.unwrap_or(0.85).clamp(0.0, 1.0) * 100.0).round().clamp(1.0, 100.0) as u8;
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality).write_image(
                &rgb,
                surface.width,
                surface.height,
                ExtendedColorType::Rgb8,
            )
        }
        // The `image` crate's WebP encoder is lossless-only; `quality` has
        // no native knob to map onto, so it is accepted but ignored here.
        ExportFormat::Webp => image::codecs::webp::WebPEncoder::new_lossless(&mut buf).write_image(
            &surface.rgba,
            surface.width,
            surface.height,
            ExtendedColorType::Rgba8,
        ),
    };
    result
        .map_err(|e| CompositorError::wrap(ErrorCode::MediaLoadFailed, "failed to encode exported frame", &e.into()))?;
    Ok(buf)
}

fn encode_png(surface: &Surface) -> framecast_core::Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut buf, surface.width, surface.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| CompositorError::wrap(ErrorCode::MediaLoadFailed, "failed to encode exported frame", &anyhow::anyhow!(e)))?;
        writer
            .write_image_data(&surface.rgba)
            .map_err(|e| CompositorError::wrap(ErrorCode::MediaLoadFailed, "failed to encode exported frame", &anyhow::anyhow!(e)))?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::test_support::ManualClock;
    use framecast_core::AudioLayer;
    use std::sync::atomic::AtomicUsize;

    fn test_compositor() -> Compositor {
        let clock: Arc<dyn AudioClock> = Arc::new(ManualClock::new(0.0));
        Compositor::with_audio_clock(64, 64, clock)
    }

    #[test]
    fn play_before_preview_is_invalid_state() {
        let c = test_compositor();
        assert!(c.play().is_err());
    }

    #[test]
    fn play_pause_emit_expected_events_in_order() {
        let c = test_compositor();
        c.preview(10.0, |t| CompositionFrame { time: t, layers: vec![], audio: vec![] }, None, false).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        c.on(EventKind::Play, move |_| recorder.lock().push("play"));
        let recorder = Arc::clone(&seen);
        c.on(EventKind::Pause, move |_| recorder.lock().push("pause"));

        c.play().unwrap();
        c.pause().unwrap();
        assert_eq!(*seen.lock(), vec!["play", "pause"]);
    }

    #[test]
    fn seek_renders_target_frame_and_emits_seeking_then_seeked() {
        let c = test_compositor();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        c.preview(
            10.0,
            move |t| {
                calls2.fetch_add(1, Ordering::SeqCst);
                CompositionFrame { time: t, layers: vec![], audio: vec![] }
            },
            None,
            false,
        )
        .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        c.on(EventKind::Seeking, move |_| recorder.lock().push("seeking"));
        let recorder = Arc::clone(&seen);
        c.on(EventKind::Seeked, move |_| recorder.lock().push("seeked"));

        c.seek(3.0).unwrap();
        assert_eq!(*seen.lock(), vec!["seeking", "seeked"]);
        assert_eq!(c.current_time(), 3.0);
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn dispose_is_idempotent_and_blocks_further_calls() {
        let c = test_compositor();
        c.dispose();
        c.dispose();
        assert!(c.play().is_err());
        assert!(!c.unload_source(SourceId::new()));
    }

    #[test]
    fn once_listener_fires_only_a_single_time() {
        let c = test_compositor();
        c.preview(10.0, |t| CompositionFrame { time: t, layers: vec![], audio: vec![] }, None, false).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        c.once(EventKind::Play, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        c.play().unwrap();
        c.pause().unwrap();
        c.play().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_removes_a_listener_before_it_fires() {
        let c = test_compositor();
        c.preview(10.0, |t| CompositionFrame { time: t, layers: vec![], audio: vec![] }, None, false).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = c.on(EventKind::Play, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        c.off(id);
        c.play().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn export_frame_without_preview_is_invalid_state() {
        let c = test_compositor();
        assert!(c.export_frame(0.0, ExportOptions { format: ExportFormat::Png, quality: None }).is_err());
    }

    #[test]
    fn export_frame_png_produces_a_valid_png_signature() {
        let c = test_compositor();
        c.preview(10.0, |t| CompositionFrame { time: t, layers: vec![], audio: vec![] }, None, false).unwrap();
        let bytes = c.export_frame(0.0, ExportOptions { format: ExportFormat::Png, quality: None }).unwrap();
        assert_eq!(&bytes[0..8], &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    }

    #[test]
    fn render_returns_false_when_a_render_is_already_pending() {
        let c = test_compositor();
        c.render_loop.lock().preview(PreviewOptions { duration: 10.0, fps: None, loop_playback: false }).unwrap();
        c.render_loop.lock().begin_render();
        let frame = CompositionFrame { time: 0.0, layers: vec![], audio: Vec::<AudioLayer>::new() };
        assert!(!c.render(&frame));
    }
}
