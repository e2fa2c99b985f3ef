//! Scripted fakes for the host media API and the decode engine.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use equiscan_core::{
    AttachOptions, CameraDescriptor, ContainerHandle, DecodeCallback, DecodeEngine,
    DeviceSelector, EngineSession, EngineState, FrameErrorCallback, MediaConstraints, MediaError,
    MediaHost, MediaStream, MediaTrack, ScanConfig, ScanController, ScanStatus, ScannerConfig,
    SessionSnapshot,
};
use tokio::sync::watch;

/// Shared, ordered record of what happened.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.all().iter().position(|e| e == event)
    }
}

pub struct FakeTrack {
    live: AtomicBool,
}

impl FakeTrack {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            live: AtomicBool::new(true),
        })
    }
}

impl MediaTrack for FakeTrack {
    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

struct FakeStream(Vec<Arc<FakeTrack>>);

impl MediaStream for FakeStream {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.0
            .iter()
            .map(|t| t.clone() as Arc<dyn MediaTrack>)
            .collect()
    }
}

// ==================== Host ====================

pub struct FakeHost {
    secure: bool,
    media: bool,
    mobile: bool,
    preflight_error: Mutex<Option<MediaError>>,
    requests: Mutex<Vec<MediaConstraints>>,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            secure: true,
            media: true,
            mobile: false,
            preflight_error: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
        }
    }

    pub fn insecure(mut self) -> Self {
        self.secure = false;
        self
    }

    pub fn without_media(mut self) -> Self {
        self.media = false;
        self
    }

    pub fn mobile(mut self) -> Self {
        self.mobile = true;
        self
    }

    pub fn failing_preflight(self, err: MediaError) -> Self {
        *self.preflight_error.lock().unwrap() = Some(err);
        self
    }

    pub fn set_preflight_error(&self, err: Option<MediaError>) {
        *self.preflight_error.lock().unwrap() = err;
    }

    pub fn requests(&self) -> Vec<MediaConstraints> {
        self.requests.lock().unwrap().clone()
    }

    pub fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.tracks.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaHost for FakeHost {
    fn is_secure_context(&self) -> bool {
        self.secure
    }

    fn has_media_devices(&self) -> bool {
        self.media
    }

    fn is_probably_mobile(&self) -> bool {
        self.mobile
    }

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Box<dyn MediaStream>, MediaError> {
        self.requests.lock().unwrap().push(*constraints);
        if let Some(err) = self.preflight_error.lock().unwrap().clone() {
            return Err(err);
        }
        let track = FakeTrack::new();
        self.tracks.lock().unwrap().push(track.clone());
        Ok(Box::new(FakeStream(vec![track])))
    }
}

// ==================== Engine ====================

#[derive(Default)]
struct Shared {
    start_failures: Mutex<HashMap<String, MediaError>>,
    start_delay: Mutex<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    events: EventLog,
}

pub struct FakeEngine {
    devices: Mutex<Result<Vec<CameraDescriptor>, MediaError>>,
    list_calls: AtomicUsize,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    shared: Arc<Shared>,
}

impl FakeEngine {
    pub fn with_devices(devices: Vec<CameraDescriptor>) -> Self {
        Self {
            devices: Mutex::new(Ok(devices)),
            list_calls: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
            shared: Arc::new(Shared::default()),
        }
    }

    /// A single camera labelled "Back Camera" with id `back-1`.
    pub fn back_camera() -> Self {
        Self::with_devices(vec![CameraDescriptor::new("back-1", "Back Camera")])
    }

    pub fn failing_enumeration(err: MediaError) -> Self {
        let engine = Self::with_devices(Vec::new());
        *engine.devices.lock().unwrap() = Err(err);
        engine
    }

    pub fn fail_device(self, id: &str, err: MediaError) -> Self {
        self.shared
            .start_failures
            .lock()
            .unwrap()
            .insert(id.to_string(), err);
        self
    }

    pub fn set_start_delay(&self, delay: Duration) {
        *self.shared.start_delay.lock().unwrap() = delay;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn last_session(&self) -> Arc<FakeSession> {
        self.sessions().last().cloned().expect("no session attached")
    }

    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.shared.max_active.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> EventLog {
        self.shared.events.clone()
    }
}

#[async_trait]
impl DecodeEngine for FakeEngine {
    async fn list_devices(&self) -> Result<Vec<CameraDescriptor>, MediaError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.devices.lock().unwrap().clone()
    }

    fn attach(
        &self,
        container: &ContainerHandle,
        _options: &AttachOptions,
    ) -> Result<Arc<dyn EngineSession>, MediaError> {
        self.shared.events.push(format!("attach:{}", container.id()));
        let session = Arc::new(FakeSession::new(self.shared.clone()));
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

pub struct FakeSession {
    shared: Arc<Shared>,
    state: Mutex<EngineState>,
    on_decode: Mutex<Option<DecodeCallback>>,
    starts: Mutex<Vec<DeviceSelector>>,
    config: Mutex<Option<ScanConfig>>,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
    stop_calls: AtomicUsize,
    cleared: AtomicBool,
    inline: AtomicBool,
}

impl FakeSession {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            state: Mutex::new(EngineState::NotStarted),
            on_decode: Mutex::new(None),
            starts: Mutex::new(Vec::new()),
            config: Mutex::new(None),
            tracks: Mutex::new(Vec::new()),
            stop_calls: AtomicUsize::new(0),
            cleared: AtomicBool::new(false),
            inline: AtomicBool::new(false),
        }
    }

    /// Simulate the engine decoding `text` from a frame.
    pub fn emit(&self, text: &str) {
        let callback = self.on_decode.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(text.to_string());
        }
    }

    pub fn starts(&self) -> Vec<DeviceSelector> {
        self.starts.lock().unwrap().clone()
    }

    pub fn config(&self) -> Option<ScanConfig> {
        *self.config.lock().unwrap()
    }

    pub fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.tracks.lock().unwrap().clone()
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn cleared(&self) -> bool {
        self.cleared.load(Ordering::SeqCst)
    }

    pub fn inline_enabled(&self) -> bool {
        self.inline.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineSession for FakeSession {
    async fn start(
        &self,
        device: &DeviceSelector,
        config: &ScanConfig,
        on_decode: DecodeCallback,
        _on_frame_error: FrameErrorCallback,
    ) -> Result<(), MediaError> {
        self.starts.lock().unwrap().push(device.clone());
        *self.config.lock().unwrap() = Some(*config);

        let delay = *self.shared.start_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let label = match device {
            DeviceSelector::Id(id) => id.clone(),
            DeviceSelector::Facing(mode) => mode.as_str().to_string(),
        };
        if let Some(err) = self.shared.start_failures.lock().unwrap().get(&label).cloned() {
            self.shared.events.push(format!("start-failed:{label}"));
            return Err(err);
        }

        let active = self.shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_active.fetch_max(active, Ordering::SeqCst);
        self.tracks.lock().unwrap().push(FakeTrack::new());
        *self.on_decode.lock().unwrap() = Some(on_decode);
        *self.state.lock().unwrap() = EngineState::Scanning;
        self.shared.events.push(format!("start:{label}"));
        Ok(())
    }

    async fn stop(&self) -> Result<(), MediaError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.state.lock().unwrap();
            if !state.is_active() {
                return Err(MediaError::new(
                    "InvalidStateError",
                    "Cannot stop, scanner is not running",
                ));
            }
            *state = EngineState::NotStarted;
        }
        for track in self.tracks() {
            track.stop();
        }
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
        self.shared.events.push("stop");
        Ok(())
    }

    fn state(&self) -> EngineState {
        *self.state.lock().unwrap()
    }

    fn clear(&self) {
        self.cleared.store(true, Ordering::SeqCst);
        self.on_decode.lock().unwrap().take();
        self.shared.events.push("clear");
    }

    fn enable_inline_playback(&self) {
        self.inline.store(true, Ordering::SeqCst);
    }
}

// ==================== Harness ====================

pub struct Harness {
    pub host: Arc<FakeHost>,
    pub engine: Arc<FakeEngine>,
    pub controller: ScanController,
    results: Arc<Mutex<Vec<(String, ScanStatus)>>>,
}

impl Harness {
    pub fn new(host: FakeHost, engine: FakeEngine, config: ScannerConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("equiscan_core=debug")
            .with_test_writer()
            .try_init();

        let host = Arc::new(host);
        let engine = Arc::new(engine);
        let results = Arc::new(Mutex::new(Vec::new()));
        let events = engine.events();

        // Filled once the controller exists, so the callback can record the
        // status it observes.
        let observer: Arc<Mutex<Option<watch::Receiver<SessionSnapshot>>>> =
            Arc::new(Mutex::new(None));

        let on_result = {
            let results = results.clone();
            let observer = observer.clone();
            Arc::new(move |text: String| {
                let status = observer
                    .lock()
                    .unwrap()
                    .as_ref()
                    .map(|rx| rx.borrow().status)
                    .unwrap_or_default();
                events.push(format!("result:{text}"));
                results.lock().unwrap().push((text, status));
            })
        };

        let controller = ScanController::new(
            host.clone(),
            engine.clone(),
            ContainerHandle::new("qr-reader-test", 360),
            config,
            on_result,
        );
        *observer.lock().unwrap() = Some(controller.subscribe());

        Self {
            host,
            engine,
            controller,
            results,
        }
    }

    pub fn default_with(engine: FakeEngine) -> Self {
        Self::new(FakeHost::new(), engine, ScannerConfig::default())
    }

    /// Decoded results with the status observed at delivery.
    pub fn results(&self) -> Vec<(String, ScanStatus)> {
        self.results.lock().unwrap().clone()
    }

    /// Let spawned tasks and timers run.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}
