//! Native camera backend.
//!
//! Uses nokhwa for cross-platform camera access and rqrr for QR decoding.
//! Every opened camera lives on its own thread, which owns it until told to
//! stop; dropping the handle also stops it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use equiscan_core::{
    AttachOptions, CameraDescriptor, ContainerHandle, DecodeCallback, DecodeEngine,
    DeviceSelector, EngineSession, EngineState, FrameErrorCallback, MediaConstraints, MediaError,
    MediaHost, MediaStream, MediaTrack, ScanConfig,
};
use nokhwa::Camera;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use tokio::sync::oneshot;

use crate::decode::{box_in_frame, crop_center, decode_grayscale, grayscale};

/// Identical payloads inside this window are reported once.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Map a nokhwa error message onto the DOM-style names the core classifies.
pub fn native_error(text: &str) -> MediaError {
    let lower = text.to_lowercase();
    let name = if lower.contains("permission")
        || lower.contains("denied")
        || lower.contains("not authorized")
    {
        "NotAllowedError"
    } else if lower.contains("busy") || lower.contains("in use") {
        "NotReadableError"
    } else if lower.contains("not found")
        || lower.contains("no device")
        || lower.contains("could not find")
    {
        "NotFoundError"
    } else if lower.contains("unsupported") || lower.contains("not supported") {
        "NotSupportedError"
    } else if lower.contains("format") || lower.contains("resolution") {
        "OverconstrainedError"
    } else {
        "Error"
    };
    MediaError::new(name, text)
}

/// Descriptor ids are the nokhwa index rendered as text.
pub fn camera_index(device: &DeviceSelector) -> CameraIndex {
    match device {
        DeviceSelector::Id(id) => id
            .parse::<u32>()
            .map(CameraIndex::Index)
            .unwrap_or_else(|_| CameraIndex::String(id.clone())),
        // Native backends do not report facing; the first camera is used.
        DeviceSelector::Facing(_) => CameraIndex::Index(0),
    }
}

/// Open a camera, trying formats from best to most permissive.
fn open_camera(index: &CameraIndex) -> Result<Camera, MediaError> {
    // Higher resolution helps with QR code detection
    let formats_to_try = [
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(CameraFormat::new(
            Resolution::new(1280, 720),
            FrameFormat::MJPEG,
            30,
        ))),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(CameraFormat::new(
            Resolution::new(1280, 720),
            FrameFormat::YUYV,
            30,
        ))),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(CameraFormat::new(
            Resolution::new(640, 480),
            FrameFormat::MJPEG,
            30,
        ))),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ];

    let mut last_error = String::new();
    for (i, requested) in formats_to_try.iter().enumerate() {
        tracing::debug!("Trying camera {} format {}/{}", index, i + 1, formats_to_try.len());
        match Camera::new(index.clone(), *requested) {
            Ok(mut camera) => {
                camera
                    .open_stream()
                    .map_err(|e| native_error(&format!("Failed to start camera stream: {}", e)))?;
                tracing::info!(
                    "Camera opened: {:?} at {:?}",
                    camera.info().human_name(),
                    camera.resolution()
                );
                return Ok(camera);
            }
            Err(e) => {
                last_error = e.to_string();
                tracing::debug!("Format {} failed: {}", i + 1, e);
            }
        }
    }

    Err(native_error(&last_error))
}

fn close_camera(mut camera: Camera) {
    if let Err(e) = camera.stop_stream() {
        tracing::debug!("Ignoring error while closing camera: {}", e);
    }
}

// ==================== Host ====================

/// Host media API backed by the local camera stack.
#[derive(Debug, Default)]
pub struct NativeHost;

#[async_trait]
impl MediaHost for NativeHost {
    /// A local process has no origin to restrict.
    fn is_secure_context(&self) -> bool {
        true
    }

    /// Only checks that a native backend exists. Enumeration blocks, so it
    /// runs on the blocking pool in `list_devices`.
    fn has_media_devices(&self) -> bool {
        nokhwa::native_api_backend().is_some()
    }

    async fn get_user_media(
        &self,
        _constraints: &MediaConstraints,
    ) -> Result<Box<dyn MediaStream>, MediaError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let live = Arc::new(AtomicBool::new(false));

        let thread_live = live.clone();
        thread::Builder::new()
            .name("equiscan-preflight".to_string())
            .spawn(move || {
                let camera = match open_camera(&CameraIndex::Index(0)) {
                    Ok(camera) => camera,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                thread_live.store(true, Ordering::Release);
                if ready_tx.send(Ok(())).is_ok() {
                    // Held until the track is stopped or dropped.
                    let _ = stop_rx.recv();
                }
                close_camera(camera);
                thread_live.store(false, Ordering::Release);
            })
            .map_err(|e| MediaError::new("AbortError", format!("Failed to spawn thread: {}", e)))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Box::new(NativeStream {
                track: Arc::new(NativeTrack {
                    stop_tx: Mutex::new(Some(stop_tx)),
                    live,
                }),
            })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MediaError::new("AbortError", "Camera thread exited early")),
        }
    }
}

struct NativeTrack {
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
    live: Arc<AtomicBool>,
}

impl MediaTrack for NativeTrack {
    fn stop(&self) {
        if let Some(tx) = lock(&self.stop_tx).take() {
            let _ = tx.send(());
        }
        self.live.store(false, Ordering::Release);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

struct NativeStream {
    track: Arc<NativeTrack>,
}

impl MediaStream for NativeStream {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        vec![self.track.clone() as Arc<dyn MediaTrack>]
    }
}

// ==================== Engine ====================

/// Decode engine running rqrr over nokhwa frames.
#[derive(Debug, Default)]
pub struct NativeEngine;

impl NativeEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DecodeEngine for NativeEngine {
    async fn list_devices(&self) -> Result<Vec<CameraDescriptor>, MediaError> {
        let cameras = tokio::task::spawn_blocking(|| nokhwa::query(ApiBackend::Auto))
            .await
            .map_err(|e| MediaError::new("AbortError", e.to_string()))?
            .map_err(|e| native_error(&e.to_string()))?;

        Ok(cameras
            .iter()
            .map(|info| CameraDescriptor::new(info.index().to_string(), info.human_name()))
            .collect())
    }

    fn attach(
        &self,
        container: &ContainerHandle,
        options: &AttachOptions,
    ) -> Result<Arc<dyn EngineSession>, MediaError> {
        Ok(Arc::new(NativeSession {
            container_width: container.width(),
            verbose: options.verbose,
            capture: Mutex::new(None),
        }))
    }
}

/// Reports each payload once per window while it stays in view.
#[derive(Debug)]
pub struct Debounce {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn accept(&mut self, text: &str, now: Instant) -> bool {
        if let Some((last, at)) = &self.last
            && last == text
            && now.saturating_duration_since(*at) < self.window
        {
            return false;
        }
        self.last = Some((text.to_string(), now));
        true
    }
}

struct Capture {
    stop_tx: mpsc::Sender<()>,
    thread: thread::JoinHandle<()>,
    running: Arc<AtomicBool>,
}

struct CaptureWorker {
    index: CameraIndex,
    box_side: u32,
    container_width: u32,
    frame_interval: Duration,
    verbose: bool,
    on_decode: DecodeCallback,
    on_frame_error: FrameErrorCallback,
    running: Arc<AtomicBool>,
}

impl CaptureWorker {
    fn run(self, ready: oneshot::Sender<Result<(), MediaError>>, stop_rx: mpsc::Receiver<()>) {
        let mut camera = match open_camera(&self.index) {
            Ok(camera) => camera,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        self.running.store(true, Ordering::Release);
        if ready.send(Ok(())).is_err() {
            tracing::debug!("Start abandoned, closing camera {}", self.index);
            self.running.store(false, Ordering::Release);
            close_camera(camera);
            return;
        }

        let mut debounce = Debounce::new(DEBOUNCE_WINDOW);
        loop {
            self.scan_frame(&mut camera, &mut debounce);

            match stop_rx.recv_timeout(self.frame_interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.running.store(false, Ordering::Release);
        close_camera(camera);
        tracing::info!("Camera capture loop ended");
    }

    fn scan_frame(&self, camera: &mut Camera, debounce: &mut Debounce) {
        let decoded = match camera.frame().and_then(|f| f.decode_image::<RgbFormat>()) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!("Frame capture error: {}", e);
                (self.on_frame_error)(native_error(&e.to_string()));
                return;
            }
        };

        let width = decoded.width() as usize;
        let height = decoded.height() as usize;
        let gray = grayscale(&decoded.into_raw());

        let side = box_in_frame(self.box_side, self.container_width, width);
        let region = crop_center(&gray, width, height, side);
        let found = decode_grayscale(&region.pixels, region.width, region.height);

        if found.is_empty() {
            if self.verbose {
                tracing::debug!("No QR code in {}x{} region", region.width, region.height);
            }
            (self.on_frame_error)(MediaError::new("NotFoundException", "No QR code found"));
            return;
        }

        let now = Instant::now();
        for text in found {
            if debounce.accept(&text, now) {
                (self.on_decode)(text);
            } else {
                tracing::trace!("Repeated payload suppressed");
            }
        }
    }
}

/// One attached capture session.
pub struct NativeSession {
    container_width: u32,
    verbose: bool,
    capture: Mutex<Option<Capture>>,
}

impl NativeSession {
    fn not_running() -> MediaError {
        MediaError::new("InvalidStateError", "Cannot stop, scanner is not running")
    }
}

#[async_trait]
impl EngineSession for NativeSession {
    async fn start(
        &self,
        device: &DeviceSelector,
        config: &ScanConfig,
        on_decode: DecodeCallback,
        on_frame_error: FrameErrorCallback,
    ) -> Result<(), MediaError> {
        if self.state().is_active() {
            return Err(MediaError::new(
                "InvalidStateError",
                "Cannot start, scanner is already running",
            ));
        }

        let running = Arc::new(AtomicBool::new(false));
        let worker = CaptureWorker {
            index: camera_index(device),
            box_side: config.detection_box.width,
            container_width: self.container_width,
            frame_interval: Duration::from_secs(1) / config.fps.max(1),
            verbose: self.verbose,
            on_decode,
            on_frame_error,
            running: running.clone(),
        };
        tracing::info!("Starting capture on camera {}", worker.index);

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("equiscan-capture".to_string())
            .spawn(move || worker.run(ready_tx, stop_rx))
            .map_err(|e| MediaError::new("AbortError", format!("Failed to spawn thread: {}", e)))?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(MediaError::new("AbortError", "Capture thread exited early")),
        }

        *lock(&self.capture) = Some(Capture {
            stop_tx,
            thread,
            running,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), MediaError> {
        let capture = lock(&self.capture).take();
        let Some(capture) = capture.filter(|c| c.running.load(Ordering::Acquire)) else {
            return Err(Self::not_running());
        };

        let _ = capture.stop_tx.send(());
        // Returns once the camera has been closed.
        match tokio::task::spawn_blocking(move || capture.thread.join()).await {
            Ok(Ok(())) => Ok(()),
            _ => Err(MediaError::new("AbortError", "Capture thread did not shut down cleanly")),
        }
    }

    fn state(&self) -> EngineState {
        match lock(&self.capture).as_ref() {
            Some(c) if c.running.load(Ordering::Acquire) => EngineState::Scanning,
            _ => EngineState::NotStarted,
        }
    }

    fn clear(&self) {
        if let Some(capture) = lock(&self.capture).take() {
            tracing::debug!("Clearing session with a live capture thread");
            let _ = capture.stop_tx.send(());
        }
    }
}

impl Drop for NativeSession {
    fn drop(&mut self) {
        self.clear();
    }
}
