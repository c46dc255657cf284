//! Worker Protocol (C7): a background thread hosting the compositor behind
//! a request/response envelope — a dedicated thread reading commands off
//! one channel and replying on another, cancellation and crash handling via
//! a shared `Mutex`/`Condvar` rather than a per-call future.
//!
//! There is no browser-worker/main-thread split in a native binary, so
//! "transferring the offscreen surface" becomes: the worker thread owns a
//! `Compositor` outright, constructed on its first `Init` request, and the
//! caller only ever sees `SourceId`s and encoded bytes crossing the
//! boundary — never a `Surface` reference.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex as StdMutex};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use framecast_core::{
    CompositionFrame, CompositorError, ErrorCode, ExportOptions, FitMode, SourceId, TextOptions,
};

use crate::compositor::Compositor;
use crate::source::MediaInput;

/// `{ id, kind, payload }` collapsed into one type — `kind` and its payload
/// are naturally one Rust enum rather than a separate tag string.
pub struct RequestEnvelope {
    pub id: u64,
    pub kind: RequestKind,
}

pub enum RequestKind {
    Init { width: u32, height: u32, background: [u8; 4] },
    LoadSource { input: MediaInput },
    LoadImage { input: MediaInput },
    LoadAudio { input: MediaInput },
    LoadText { options: TextOptions },
    UpdateText { id: SourceId, options: TextOptions },
    UnloadSource { id: SourceId },
    Render { frame: CompositionFrame },
    Clear,
    Resize { width: u32, height: u32, fit: Option<FitMode> },
    ExportFrame { frame: CompositionFrame, options: ExportOptions },
    Dispose,
}

#[derive(Debug, Clone)]
pub enum ResponseValue {
    None,
    SourceId(SourceId),
    Bool(bool),
    Bytes(Vec<u8>),
}

/// `{ id, ok, result?, error? }`.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub id: u64,
    pub ok: bool,
    pub result: Option<ResponseValue>,
    pub error: Option<CompositorError>,
}

impl ResponseEnvelope {
    fn ok(id: u64, result: ResponseValue) -> Self {
        Self { id, ok: true, result: Some(result), error: None }
    }

    fn err(id: u64, error: CompositorError) -> Self {
        Self { id, ok: false, result: None, error: Some(error) }
    }
}

/// Main-side client: serializes calls into `RequestKind`s and blocks until
/// the matching response arrives, buffering any that land out of order in
/// an in-flight map keyed by request id.
pub struct CompositorWorker {
    tx: Sender<RequestEnvelope>,
    next_id: AtomicU64,
    shared: Arc<Shared>,
}

struct Shared {
    pending: StdMutex<HashMap<u64, ResponseEnvelope>>,
    cvar: Condvar,
    terminal: StdMutex<Option<CompositorError>>,
}

impl CompositorWorker {
    pub fn spawn() -> Self {
        let (req_tx, req_rx) = bounded::<RequestEnvelope>(64);
        let (resp_tx, resp_rx) = bounded::<ResponseEnvelope>(64);

        thread::spawn(move || worker_loop(req_rx, resp_tx));

        let shared = Arc::new(Shared {
            pending: StdMutex::new(HashMap::new()),
            cvar: Condvar::new(),
            terminal: StdMutex::new(None),
        });
        let relay_shared = Arc::clone(&shared);
        thread::spawn(move || {
            for response in resp_rx {
                relay_shared.pending.lock().unwrap().insert(response.id, response);
                relay_shared.cvar.notify_all();
            }
            // Channel closed: the worker thread exited (panic or normal
            // drop). Any request still in flight would otherwise wait
            // forever — wake every waiter with a terminal error so the
            // client rejects all pending and future requests instead of
            // hanging.
            *relay_shared.terminal.lock().unwrap() =
                Some(CompositorError::new(ErrorCode::UnknownError, "worker thread terminated"));
            relay_shared.cvar.notify_all();
        });

        Self { tx: req_tx, next_id: AtomicU64::new(1), shared }
    }

    fn call(&self, kind: RequestKind) -> ResponseEnvelope {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(RequestEnvelope { id, kind }).is_err() {
            return ResponseEnvelope::err(id, CompositorError::new(ErrorCode::UnknownError, "worker thread terminated"));
        }
        self.wait_for(id)
    }

    fn wait_for(&self, id: u64) -> ResponseEnvelope {
        let mut pending = self.shared.pending.lock().unwrap();
        loop {
            if let Some(response) = pending.remove(&id) {
                return response;
            }
            if let Some(terminal) = self.shared.terminal.lock().unwrap().clone() {
                return ResponseEnvelope::err(id, terminal);
            }
            pending = self.shared.cvar.wait(pending).unwrap();
        }
    }

    pub fn init(&self, width: u32, height: u32, background: [u8; 4]) -> framecast_core::Result<()> {
        unit(self.call(RequestKind::Init { width, height, background }))
    }

    pub fn load_video(&self, input: MediaInput) -> framecast_core::Result<SourceId> {
        source_id(self.call(RequestKind::LoadSource { input }))
    }

    pub fn load_image(&self, input: MediaInput) -> framecast_core::Result<SourceId> {
        source_id(self.call(RequestKind::LoadImage { input }))
    }

    pub fn load_audio(&self, input: MediaInput) -> framecast_core::Result<SourceId> {
        source_id(self.call(RequestKind::LoadAudio { input }))
    }

    pub fn load_text(&self, options: TextOptions) -> framecast_core::Result<SourceId> {
        source_id(self.call(RequestKind::LoadText { options }))
    }

    pub fn update_text(&self, id: SourceId, options: TextOptions) -> framecast_core::Result<()> {
        unit(self.call(RequestKind::UpdateText { id, options }))
    }

    pub fn unload_source(&self, id: SourceId) -> framecast_core::Result<bool> {
        boolean(self.call(RequestKind::UnloadSource { id }))
    }

    pub fn render(&self, frame: CompositionFrame) -> framecast_core::Result<bool> {
        boolean(self.call(RequestKind::Render { frame }))
    }

    pub fn clear(&self) -> framecast_core::Result<()> {
        unit(self.call(RequestKind::Clear))
    }

    pub fn resize(&self, width: u32, height: u32, fit: Option<FitMode>) -> framecast_core::Result<()> {
        unit(self.call(RequestKind::Resize { width, height, fit }))
    }

    pub fn export_frame(&self, frame: CompositionFrame, options: ExportOptions) -> framecast_core::Result<Vec<u8>> {
        bytes(self.call(RequestKind::ExportFrame { frame, options }))
    }

    pub fn dispose(&self) {
        let _ = self.call(RequestKind::Dispose);
    }
}

fn unit(response: ResponseEnvelope) -> framecast_core::Result<()> {
    if response.ok {
        Ok(())
    } else {
        Err(response.error.unwrap_or_else(|| CompositorError::new(ErrorCode::UnknownError, "request failed")))
    }
}

fn source_id(response: ResponseEnvelope) -> framecast_core::Result<SourceId> {
    match (response.ok, response.result) {
        (true, Some(ResponseValue::SourceId(id))) => Ok(id),
        (false, _) => Err(response.error.unwrap_or_else(|| CompositorError::new(ErrorCode::UnknownError, "request failed"))),
        _ => Err(CompositorError::new(ErrorCode::UnknownError, "malformed worker response")),
    }
}

fn boolean(response: ResponseEnvelope) -> framecast_core::Result<bool> {
    match (response.ok, response.result) {
        (true, Some(ResponseValue::Bool(b))) => Ok(b),
        (false, _) => Err(response.error.unwrap_or_else(|| CompositorError::new(ErrorCode::UnknownError, "request failed"))),
        _ => Err(CompositorError::new(ErrorCode::UnknownError, "malformed worker response")),
    }
}

fn bytes(response: ResponseEnvelope) -> framecast_core::Result<Vec<u8>> {
    match (response.ok, response.result) {
        (true, Some(ResponseValue::Bytes(b))) => Ok(b),
        (false, _) => Err(response.error.unwrap_or_else(|| CompositorError::new(ErrorCode::UnknownError, "request failed"))),
        _ => Err(CompositorError::new(ErrorCode::UnknownError, "malformed worker response")),
    }
}

fn worker_loop(req_rx: Receiver<RequestEnvelope>, resp_tx: Sender<ResponseEnvelope>) {
    let mut compositor: Option<Compositor> = None;
    for request in req_rx {
        let response = handle(&mut compositor, request.id, request.kind);
        if resp_tx.send(response).is_err() {
            return;
        }
    }
}

fn handle(compositor: &mut Option<Compositor>, id: u64, kind: RequestKind) -> ResponseEnvelope {
    if let RequestKind::Init { width, height, background } = kind {
        let c = Compositor::new(width, height);
        c.set_background(background);
        *compositor = Some(c);
        return ResponseEnvelope::ok(id, ResponseValue::None);
    }

    let Some(c) = compositor.as_ref() else {
        return ResponseEnvelope::err(id, CompositorError::invalid_state("worker not initialized; send init first"));
    };

    match kind {
        RequestKind::Init { .. } => unreachable!("handled above"),
        RequestKind::LoadSource { input } => {
            ResponseEnvelope::from_result(id, c.load_video(input).map(ResponseValue::SourceId))
        }
        RequestKind::LoadImage { input } => {
            ResponseEnvelope::from_result(id, c.load_image(input).map(ResponseValue::SourceId))
        }
        RequestKind::LoadAudio { input } => {
            ResponseEnvelope::from_result(id, c.load_audio(input).map(ResponseValue::SourceId))
        }
        RequestKind::LoadText { options } => {
            ResponseEnvelope::from_result(id, c.load_text(&options).map(ResponseValue::SourceId))
        }
        RequestKind::UpdateText { id: source, options } => {
            ResponseEnvelope::from_result(id, c.update_text(source, &options).map(|_| ResponseValue::None))
        }
        RequestKind::UnloadSource { id: source } => {
            ResponseEnvelope::ok(id, ResponseValue::Bool(c.unload_source(source)))
        }
        RequestKind::Render { frame } => {
            if let Some(unknown) = frame.layers.iter().find(|l| !c.source_known(l.source_id)) {
                return ResponseEnvelope::err(id, CompositorError::unknown_source(unknown.source_id));
            }
            ResponseEnvelope::ok(id, ResponseValue::Bool(c.render(&frame)))
        }
        RequestKind::Clear => ResponseEnvelope::from_result(id, c.clear().map(|_| ResponseValue::None)),
        RequestKind::Resize { width, height, fit } => {
            ResponseEnvelope::from_result(id, c.resize(width, height, fit).map(|_| ResponseValue::None))
        }
        RequestKind::ExportFrame { frame, options } => {
            if let Some(unknown) = frame.layers.iter().find(|l| !c.source_known(l.source_id)) {
                return ResponseEnvelope::err(id, CompositorError::unknown_source(unknown.source_id));
            }
            ResponseEnvelope::from_result(id, c.export_composition_frame(&frame, options).map(ResponseValue::Bytes))
        }
        RequestKind::Dispose => {
            c.dispose();
            ResponseEnvelope::ok(id, ResponseValue::None)
        }
    }
}

impl ResponseEnvelope {
    fn from_result(id: u64, result: framecast_core::Result<ResponseValue>) -> Self {
        match result {
            Ok(value) => Self::ok(id, value),
            Err(e) => Self::err(id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framecast_core::{AudioLayer, ExportFormat};

    #[test]
    fn requests_before_init_return_invalid_state() {
        let worker = CompositorWorker::spawn();
        let err = worker.clear().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidState);
        worker.dispose();
    }

    #[test]
    fn render_with_unknown_source_id_returns_unknown_error() {
        let worker = CompositorWorker::spawn();
        worker.init(16, 16, [0, 0, 0, 255]).unwrap();

        let frame = CompositionFrame {
            time: 0.0,
            layers: vec![framecast_core::Layer {
                source_id: SourceId::new(),
                source_time: None,
                transform: Default::default(),
                fit_mode: FitMode::Contain,
                visible: true,
                z_index: 0,
            }],
            audio: Vec::<AudioLayer>::new(),
        };
        let err = worker.render(frame).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownError);
        worker.dispose();
    }

    #[test]
    fn clear_after_init_succeeds() {
        let worker = CompositorWorker::spawn();
        worker.init(16, 16, [1, 2, 3, 255]).unwrap();
        assert!(worker.clear().is_ok());
        worker.dispose();
    }

    #[test]
    fn export_frame_with_unknown_source_id_returns_unknown_error() {
        let worker = CompositorWorker::spawn();
        worker.init(16, 16, [0, 0, 0, 255]).unwrap();

        let frame = CompositionFrame {
            time: 0.0,
            layers: vec![framecast_core::Layer {
                source_id: SourceId::new(),
                source_time: None,
                transform: Default::default(),
                fit_mode: FitMode::Contain,
                visible: true,
                z_index: 0,
            }],
            audio: Vec::<AudioLayer>::new(),
        };
        let err = worker
            .export_frame(frame, ExportOptions { format: ExportFormat::Png, quality: None })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownError);
        worker.dispose();
    }

    #[test]
    fn export_frame_renders_synchronously_and_returns_encoded_bytes() {
        let worker = CompositorWorker::spawn();
        worker.init(16, 16, [0, 0, 0, 255]).unwrap();

        let frame = CompositionFrame { time: 0.0, layers: Vec::new(), audio: Vec::new() };
        let bytes = worker
            .export_frame(frame, ExportOptions { format: ExportFormat::Png, quality: None })
            .unwrap();
        assert_eq!(&bytes[..8], &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n']);
        worker.dispose();
    }
}
