//! Video source: a decoded-frame cursor with a one-item lookahead (the
//! sequential-advance fast path) plus the alternate quantized-LRU mode for
//! simpler callers.
//!
//! Built around the usual `ictx`/`decoder`/`scaler` triple and a
//! seek-then-burn-through decode shape, collapsed into the single
//! `getFrameAt` contract the compositor needs.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::{input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use parking_lot::Mutex;

use framecast_core::{CompositorError, ErrorCode, Image};

use crate::audio::SourceAudioTrack;

/// Gap beyond which the cursor restarts from scratch rather than advancing
/// sequentially.
const RESEEK_THRESHOLD_SECS: f64 = 0.75;

struct DecodedFrame {
    image: Image,
    timestamp: f64,
}

/// The sequential-advance cursor: owns the open decode context and the
/// one-item lookahead. Behind a mutex on `VideoSource` so at most one
/// `getFrameAt` touches it at a time (invariant (iii)).
struct Cursor {
    path: PathBuf,
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::video::Video,
    video_idx: usize,
    scaler: SwsContext,
    out_w: u32,
    out_h: u32,
    tb_num: i32,
    tb_den: i32,
    last_pts: i64,
    current: Option<DecodedFrame>,
    next: Option<DecodedFrame>,
    last_requested_time: f64,
    ended: bool,
}

impl Cursor {
    fn open(path: &PathBuf, start_at: f64) -> anyhow::Result<Self> {
        let mut ictx = input(path)?;
        let video_idx = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| anyhow::anyhow!("no video stream"))?
            .index();

        let (tb_num, tb_den, seek_ts) = {
            let stream = ictx.stream(video_idx).unwrap();
            let tb = stream.time_base();
            let seek_ts = (start_at * tb.denominator() as f64 / tb.numerator() as f64) as i64;
            (tb.numerator(), tb.denominator(), seek_ts)
        };
        if start_at > 0.0 {
            let _ = ictx.seek(seek_ts, ..=seek_ts);
        }

        // Second context for decoder construction — Parameters borrows from
        // the first context's Stream, so a fresh handle avoids the conflict.
        let ictx2 = input(path)?;
        let stream2 = ictx2.stream(video_idx).unwrap();
        let dec_ctx = ffmpeg::codec::context::Context::from_parameters(stream2.parameters())?;
        let decoder = dec_ctx.decoder().video()?;

        let out_w = decoder.width().max(2);
        let out_h = decoder.height().max(2);
        let scaler = SwsContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGBA,
            out_w,
            out_h,
            Flags::BILINEAR,
        )?;

        Ok(Self {
            path: path.clone(),
            ictx,
            decoder,
            video_idx,
            scaler,
            out_w,
            out_h,
            tb_num,
            tb_den,
            last_pts: seek_ts.saturating_sub(1),
            current: None,
            next: None,
            last_requested_time: start_at,
            ended: false,
        })
    }

    fn pts_to_secs(&self, pts: i64) -> f64 {
        pts as f64 * self.tb_num as f64 / self.tb_den as f64
    }

    /// Decodes the next frame from the open stream, or `None` at EOF.
    fn decode_one(&mut self) -> Option<DecodedFrame> {
        for (stream, packet) in self.ictx.packets().flatten() {
            if stream.index() != self.video_idx {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }
            let mut decoded = ffmpeg::util::frame::video::Video::empty();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let pts = decoded.pts().unwrap_or(self.last_pts + 1);
                self.last_pts = pts;
                let mut out = ffmpeg::util::frame::video::Video::empty();
                if self.scaler.run(&decoded, &mut out).is_err() {
                    return None;
                }
                let stride = out.stride(0);
                let raw = out.data(0);
                let rgba: Vec<u8> = (0..self.out_h as usize)
                    .flat_map(|row| {
                        let s = row * stride;
                        &raw[s..s + self.out_w as usize * 4]
                    })
                    .copied()
                    .collect();
                return Some(DecodedFrame {
                    image: Image { width: self.out_w, height: self.out_h, rgba },
                    timestamp: self.pts_to_secs(pts),
                });
            }
        }
        None
    }

    /// Fills `next` (and `current` on the very first call) without blocking
    /// past what's already buffered.
    fn prime(&mut self) {
        if self.current.is_none() {
            self.current = self.decode_one();
        }
        if self.next.is_none() {
            self.next = self.decode_one();
        }
    }

    /// Step 4 of the `getFrameAt` algorithm: consume frames via the lookahead
    /// until `next.timestamp > t`, keeping the last-consumed frame current.
    fn advance_to(&mut self, t: f64) {
        self.prime();
        loop {
            match &self.next {
                Some(n) if n.timestamp <= t => {
                    self.current = self.next.take();
                    self.next = self.decode_one();
                }
                Some(_) => break,
                None => {
                    // Lookahead exhausted: treat remaining `current` as final.
                    self.ended = self.current.is_some() && {
                        let cur_ts = self.current.as_ref().unwrap().timestamp;
                        cur_ts <= t
                    };
                    break;
                }
            }
        }
    }

    fn covers(&self, t: f64) -> bool {
        match (&self.current, &self.next) {
            (Some(cur), Some(next)) => cur.timestamp <= t && t < next.timestamp,
            (Some(cur), None) => cur.timestamp <= t,
            _ => false,
        }
    }
}

/// One-shot random-access decode, used as the fallback when the sequential
/// cursor's iterator fails outright.
fn decode_at_random_access(path: &PathBuf, t: f64) -> Option<Image> {
    let mut ictx = input(path).ok()?;
    let video_idx = ictx.streams().best(Type::Video)?.index();
    let (tb_num, tb_den, seek_ts) = {
        let stream = ictx.stream(video_idx).unwrap();
        let tb = stream.time_base();
        let ts = (t * tb.denominator() as f64 / tb.numerator() as f64) as i64;
        (tb.numerator() as f64, tb.denominator() as f64, ts)
    };
    let _ = ictx.seek(seek_ts, ..=seek_ts);

    let ictx2 = input(path).ok()?;
    let stream2 = ictx2.stream(video_idx)?;
    let dec_ctx = ffmpeg::codec::context::Context::from_parameters(stream2.parameters()).ok()?;
    let mut decoder = dec_ctx.decoder().video().ok()?;
    let (out_w, out_h) = (decoder.width().max(2), decoder.height().max(2));
    let mut scaler = SwsContext::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        Pixel::RGBA,
        out_w,
        out_h,
        Flags::BILINEAR,
    )
    .ok()?;

    let mut last_good: Option<Vec<u8>> = None;
    for (stream, packet) in ictx.packets().flatten() {
        if stream.index() != video_idx {
            continue;
        }
        if decoder.send_packet(&packet).is_err() {
            continue;
        }
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            let mut out = ffmpeg::util::frame::video::Video::empty();
            if scaler.run(&decoded, &mut out).is_err() {
                continue;
            }
            let stride = out.stride(0);
            let raw = out.data(0);
            let data: Vec<u8> = (0..out_h as usize)
                .flat_map(|row| &raw[row * stride..row * stride + out_w as usize * 4])
                .copied()
                .collect();
            let pts_secs = decoded.pts().map(|p| p as f64 * tb_num / tb_den).unwrap_or(t);
            last_good = Some(data.clone());
            if pts_secs >= t {
                return Some(Image { width: out_w, height: out_h, rgba: data });
            }
        }
    }
    last_good.map(|rgba| Image { width: out_w, height: out_h, rgba })
}

/// A bounded least-recently-used cache of decoded frames keyed by a
/// frame-interval-quantized integer millisecond. An alternate mode for
/// simpler video sources that don't need sequential cursor tracking.
pub struct FrameLru {
    capacity: usize,
    order: VecDeque<i64>,
    entries: HashMap<i64, Image>,
}

impl FrameLru {
    /// Capacity adapts to resolution: >=1080p -> 15, >=720p -> 30, smaller
    /// -> 60.
    pub fn capacity_for(width: u32, height: u32) -> usize {
        if height >= 1080 || width >= 1920 {
            15
        } else if height >= 720 || width >= 1280 {
            30
        } else {
            60
        }
    }

    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), order: VecDeque::new(), entries: HashMap::new() }
    }

    pub fn quantize(t: f64, frame_interval_ms: u32) -> i64 {
        let ms = (t * 1000.0).floor() as i64;
        let interval = frame_interval_ms.max(1) as i64;
        (ms / interval) * interval
    }

    pub fn get(&mut self, key: i64) -> Option<Image> {
        if !self.entries.contains_key(&key) {
            return None;
        }
        self.order.retain(|&k| k != key);
        self.order.push_back(key);
        self.entries.get(&key).cloned()
    }

    pub fn set(&mut self, key: i64, image: Image) {
        if !self.entries.contains_key(&key) && self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
        self.order.retain(|&k| k != key);
        self.order.push_back(key);
        self.entries.insert(key, image);
    }

    #[cfg(test)]
    pub fn keys(&self) -> Vec<i64> {
        self.order.iter().copied().collect()
    }
}

/// A loaded, decodable video asset. Exclusively owned by the source pool;
/// layers address it by `SourceId`.
pub struct VideoSource {
    path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub duration: f64,
    pub frame_interval_ms: u32,
    cursor: Mutex<Option<Cursor>>,
    disposed: std::sync::atomic::AtomicBool,
    pub audio: Option<SourceAudioTrack>,
    pub thumbnail: Option<Image>,
}

impl VideoSource {
    pub fn open(path: PathBuf) -> framecast_core::Result<Self> {
        let probe = input(&path).map_err(|e| {
            CompositorError::wrap(ErrorCode::MediaLoadFailed, "failed to open video", &e.into())
        })?;
        let video_stream = probe.streams().best(Type::Video).ok_or_else(|| {
            CompositorError::new(ErrorCode::MediaNotSupported, "no video track in source")
        })?;

        let duration = {
            let top = probe.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;
            if top > 0.0 {
                top
            } else {
                let tb = video_stream.time_base();
                video_stream.duration() as f64 * tb.numerator() as f64 / tb.denominator() as f64
            }
        };

        let (width, height) = unsafe {
            let p = video_stream.parameters().as_ptr();
            ((*p).width as u32, (*p).height as u32)
        };

        // Probe average packet rate to choose frame_interval_ms (fallback 30fps).
        let frame_interval_ms = {
            let rate = video_stream.avg_frame_rate();
            if rate.numerator() > 0 && rate.denominator() > 0 {
                ((1000 * rate.denominator() as i64) / rate.numerator() as i64).max(1) as u32
            } else {
                33
            }
        };

        let has_audio = probe.streams().best(Type::Audio).is_some();
        drop(probe);

        // Opening an audio sink is best-effort and non-fatal: a video
        // plays silently rather than failing to load over an audio glitch.
        let audio = if has_audio {
            match SourceAudioTrack::open(&path) {
                Ok(track) => Some(track),
                Err(e) => {
                    tracing::warn!(target: "pool", error = %e, "video source: audio track open failed, continuing video-only");
                    None
                }
            }
        } else {
            None
        };

        let thumbnail = if duration.is_finite() && duration > 0.0 {
            decode_at_random_access(&path, (duration * 0.1).max(0.0))
        } else {
            None
        };

        Ok(Self {
            path,
            width,
            height,
            duration,
            frame_interval_ms,
            cursor: Mutex::new(None),
            disposed: std::sync::atomic::AtomicBool::new(false),
            audio,
            thumbnail,
        })
    }

    pub fn dispose(&self) {
        self.disposed.store(true, std::sync::atomic::Ordering::SeqCst);
        *self.cursor.lock() = None;
    }

    /// Serialized by the mutex so at most one decoder advance is in flight
    /// per source at a time.
    pub fn get_frame_at(&self, t: f64) -> Option<Image> {
        if self.disposed.load(std::sync::atomic::Ordering::SeqCst) {
            return None;
        }
        let t = t.max(0.0);
        let mut guard = self.cursor.lock();

        // Fast path: current frame already covers `t`.
        if let Some(cursor) = guard.as_mut() {
            if cursor.covers(t) {
                cursor.last_requested_time = t;
                return cursor.current.as_ref().map(|f| f.image.clone());
            }
        }

        let needs_seek = match guard.as_ref() {
            None => true,
            Some(cursor) => {
                t < cursor.last_requested_time || (t - cursor.last_requested_time).abs() > RESEEK_THRESHOLD_SECS
            }
        };

        if needs_seek {
            *guard = Cursor::open(&self.path, t).ok();
        }

        let Some(cursor) = guard.as_mut() else {
            // Iterator failed to open outright: fall back to random access.
            drop(guard);
            return decode_at_random_access(&self.path, t);
        };

        cursor.advance_to(t);
        cursor.last_requested_time = t;

        match &cursor.current {
            Some(frame) => Some(frame.image.clone()),
            None => {
                // Sequential decode produced nothing: fall back to a single
                // random-access decode before giving up entirely.
                drop(guard);
                decode_at_random_access(&self.path, t)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_evicts_least_recently_used_after_promotion() {
        let mut lru = FrameLru::new(3);
        let blank = |n: u8| Image { width: 1, height: 1, rgba: vec![n; 4] };
        lru.set(1, blank(1));
        lru.set(2, blank(2));
        lru.set(3, blank(3));
        lru.set(4, blank(4));
        assert_eq!(lru.keys(), vec![2, 3, 4]);
        assert!(lru.get(2).is_some());
        lru.set(5, blank(5));
        let mut keys = lru.keys();
        keys.sort();
        assert_eq!(keys, vec![2, 4, 5]);
    }

    #[test]
    fn quantize_rounds_down_to_frame_boundary() {
        assert_eq!(FrameLru::quantize(0.0, 33), 0);
        assert_eq!(FrameLru::quantize(0.05, 33), 33);
        assert_eq!(FrameLru::quantize(0.032, 33), 0);
    }

    #[test]
    fn lru_capacity_adapts_to_resolution() {
        assert_eq!(FrameLru::capacity_for(1920, 1080), 15);
        assert_eq!(FrameLru::capacity_for(1280, 720), 30);
        assert_eq!(FrameLru::capacity_for(640, 480), 60);
    }
}
