//! Layer Blender: fetches images for every visible layer in parallel, then
//! draws synchronously in z-order once every fetch has resolved, so a slow
//! layer never lets a stale frame flash underneath a fast one. Parallel
//! fan-out is `rayon`.

use rayon::prelude::*;

use framecast_core::{compute_fit, resolve_transform, CompositionFrame, FitMode, Image, Layer, Surface};

/// What the blender needs from the Source Pool: a parallel-safe frame
/// fetch and the intrinsic size used for fit computation. Factored as a
/// trait (rather than a hard dependency on `SourcePool`) so tests can swap
/// in a fake with artificial fetch latency to exercise the flicker-free
/// ordering guarantee.
pub trait FrameSource: Sync {
    fn get_frame_at(&self, id: framecast_core::SourceId, t: f64) -> Option<Image>;
    fn intrinsic_size(&self, id: framecast_core::SourceId) -> (u32, u32);
}

impl FrameSource for crate::pool::SourcePool {
    fn get_frame_at(&self, id: framecast_core::SourceId, t: f64) -> Option<Image> {
        crate::pool::SourcePool::get_frame_at(self, id, t)
    }

    fn intrinsic_size(&self, id: framecast_core::SourceId) -> (u32, u32) {
        match crate::pool::SourcePool::get_source(self, id) {
            Some(info) => (info.width, info.height),
            None => (0, 0),
        }
    }
}

/// True when `layers` are already in ascending, possibly-tied `zIndex`
/// order — callers only pay for a sort when they have to.
fn is_z_ordered(layers: &[&Layer]) -> bool {
    layers.windows(2).all(|w| w[0].z_index <= w[1].z_index)
}

/// Draws one composition frame onto `surface`. Returns the number of
/// layers actually drawn (fetch succeeded); the caller can compare against
/// visible-layer count to know how many were skipped. Always clears the
/// surface first, so total surface writes equal one plus the number of
/// fetched visible layers — observable by wrapping `Surface` in an
/// instrumented test double when needed.
pub fn render(
    frame: &CompositionFrame,
    surface: &mut Surface,
    source: &dyn FrameSource,
    background: [u8; 4],
    global_fit_mode: FitMode,
) -> usize {
    let mut visible: Vec<&Layer> = frame.layers.iter().filter(|l| l.visible).collect();
    if !is_z_ordered(&visible) {
        visible.sort_by_key(|l| l.z_index);
    }

    // Parallel fan-out: one getFrameAt per visible layer, order preserved
    // by index so z-order survives the fetch.
    let fetched: Vec<Option<Image>> = visible
        .par_iter()
        .map(|layer| {
            let t = layer.source_time.unwrap_or(frame.time);
            source.get_frame_at(layer.source_id, t)
        })
        .collect();

    // Flicker-free: the clear is the first write, only after every fetch
    // above has resolved.
    surface.clear(background);

    let mut drawn = 0;
    for (layer, image) in visible.iter().zip(fetched.iter()) {
        let Some(image) = image else { continue };
        let (sw, sh) = source.intrinsic_size(layer.source_id);
        let effective_fit = match layer.fit_mode {
            FitMode::Auto => global_fit_mode,
            other => other,
        };
        let fitted = compute_fit(effective_fit, sw as f64, sh as f64, surface.width as f64, surface.height as f64);
        let instr = resolve_transform(&layer.transform, fitted);
        if instr.is_identity() {
            surface.draw_identity(image, &instr);
        } else {
            surface.draw_transformed(image, &instr);
        }
        drawn += 1;
    }

    drawn
}

#[cfg(test)]
mod tests {
    use super::*;
    use framecast_core::{AudioLayer, SourceId, Transform};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct FakeSource {
        sizes: std::collections::HashMap<SourceId, (u32, u32)>,
        delays_ms: std::collections::HashMap<SourceId, u64>,
        images: std::collections::HashMap<SourceId, Image>,
        fetch_order: Mutex<Vec<SourceId>>,
        fetch_count: AtomicUsize,
    }

    impl FrameSource for FakeSource {
        fn get_frame_at(&self, id: SourceId, _t: f64) -> Option<Image> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            if let Some(&ms) = self.delays_ms.get(&id) {
                std::thread::sleep(Duration::from_millis(ms));
            }
            self.fetch_order.lock().unwrap().push(id);
            self.images.get(&id).cloned()
        }

        fn intrinsic_size(&self, id: SourceId) -> (u32, u32) {
            self.sizes.get(&id).copied().unwrap_or((0, 0))
        }
    }

    fn layer(id: SourceId, z: i32) -> Layer {
        Layer {
            source_id: id,
            source_time: None,
            transform: Transform::default(),
            fit_mode: FitMode::Fill,
            visible: true,
            z_index: z,
        }
    }

    fn solid(w: u32, h: u32, px: [u8; 4]) -> Image {
        Image { width: w, height: h, rgba: px.repeat((w * h) as usize) }
    }

    #[test]
    fn draws_in_ascending_z_order_even_when_input_is_unsorted() {
        let (a, b, c) = (SourceId::new(), SourceId::new(), SourceId::new());
        let mut images = std::collections::HashMap::new();
        images.insert(a, solid(4, 4, [1, 0, 0, 255]));
        images.insert(b, solid(4, 4, [0, 1, 0, 255]));
        images.insert(c, solid(4, 4, [0, 0, 1, 255]));
        let mut sizes = std::collections::HashMap::new();
        sizes.insert(a, (4, 4));
        sizes.insert(b, (4, 4));
        sizes.insert(c, (4, 4));
        let fake = FakeSource {
            sizes,
            delays_ms: Default::default(),
            images,
            fetch_order: Mutex::new(Vec::new()),
            fetch_count: AtomicUsize::new(0),
        };

        let frame = CompositionFrame {
            time: 0.0,
            layers: vec![layer(c, 2), layer(a, 0), layer(b, 1)],
            audio: Vec::<AudioLayer>::new(),
        };
        let mut surface = Surface::new(4, 4);
        let drawn = render(&frame, &mut surface, &fake, [0, 0, 0, 255], FitMode::Contain);
        assert_eq!(drawn, 3);
        // Final pixel reflects the topmost z-index (c, drawn last).
        assert_eq!(&surface.rgba[0..4], &[0, 0, 1, 255]);
    }

    #[test]
    fn clear_happens_only_after_every_fetch_resolves() {
        let (fast1, slow, fast2) = (SourceId::new(), SourceId::new(), SourceId::new());
        let mut images = std::collections::HashMap::new();
        images.insert(fast1, solid(2, 2, [10, 0, 0, 255]));
        images.insert(slow, solid(2, 2, [0, 10, 0, 255]));
        images.insert(fast2, solid(2, 2, [0, 0, 10, 255]));
        let mut sizes = std::collections::HashMap::new();
        sizes.insert(fast1, (2, 2));
        sizes.insert(slow, (2, 2));
        sizes.insert(fast2, (2, 2));
        let mut delays = std::collections::HashMap::new();
        delays.insert(slow, 20);

        let fake = FakeSource {
            sizes,
            delays_ms: delays,
            images,
            fetch_order: Mutex::new(Vec::new()),
            fetch_count: AtomicUsize::new(0),
        };

        let frame = CompositionFrame {
            time: 0.0,
            layers: vec![layer(fast1, 0), layer(slow, 1), layer(fast2, 2)],
            audio: Vec::<AudioLayer>::new(),
        };
        let mut surface = Surface::new(2, 2);
        let start = Instant::now();
        let drawn = render(&frame, &mut surface, &fake, [0, 0, 0, 255], FitMode::Contain);
        assert!(start.elapsed() >= Duration::from_millis(18));
        assert_eq!(drawn, 3);
    }

    #[test]
    fn unfetched_layer_is_skipped_silently() {
        let missing = SourceId::new();
        let fake = FakeSource {
            sizes: Default::default(),
            delays_ms: Default::default(),
            images: Default::default(),
            fetch_order: Mutex::new(Vec::new()),
            fetch_count: AtomicUsize::new(0),
        };
        let frame =
            CompositionFrame { time: 0.0, layers: vec![layer(missing, 0)], audio: Vec::<AudioLayer>::new() };
        let mut surface = Surface::new(2, 2);
        let drawn = render(&frame, &mut surface, &fake, [5, 5, 5, 255], FitMode::Contain);
        assert_eq!(drawn, 0);
        assert_eq!(&surface.rgba[0..4], &[5, 5, 5, 255]);
    }

    #[test]
    fn empty_layers_clears_to_background_and_returns_zero_drawn() {
        let fake = FakeSource {
            sizes: Default::default(),
            delays_ms: Default::default(),
            images: Default::default(),
            fetch_order: Mutex::new(Vec::new()),
            fetch_count: AtomicUsize::new(0),
        };
        let frame = CompositionFrame { time: 0.0, layers: Vec::new(), audio: Vec::<AudioLayer>::new() };
        let mut surface = Surface::new(3, 3);
        let drawn = render(&frame, &mut surface, &fake, [9, 9, 9, 255], FitMode::Contain);
        assert_eq!(drawn, 0);
        assert!(surface.rgba.chunks_exact(4).all(|px| px == [9, 9, 9, 255]));
    }

    #[test]
    fn invisible_layer_never_fetched() {
        let id = SourceId::new();
        let fake = FakeSource {
            sizes: Default::default(),
            delays_ms: Default::default(),
            images: Default::default(),
            fetch_order: Mutex::new(Vec::new()),
            fetch_count: AtomicUsize::new(0),
        };
        let mut hidden = layer(id, 0);
        hidden.visible = false;
        let frame = CompositionFrame { time: 0.0, layers: vec![hidden], audio: Vec::<AudioLayer>::new() };
        let mut surface = Surface::new(2, 2);
        render(&frame, &mut surface, &fake, [0, 0, 0, 255], FitMode::Contain);
        assert_eq!(fake.fetch_count.load(Ordering::SeqCst), 0);
    }
}
