//! Scan lifecycle controller.
//!
//! Sequences capability checks, the permission preflight, device selection and
//! the decode session, and guarantees the camera is released on every exit
//! path: decoded result with auto-stop, explicit stop, page hidden, unmount,
//! and failure.
//!
//! Concurrency rules:
//! - `starting` and `stopping` latches are taken with a compare-exchange
//!   before the first await, so a second call sees them immediately.
//! - Every start and stop bumps `generation`. After each await, `start`
//!   checks that it is still mounted and still the newest operation before
//!   touching visible state.
//! - The live session sits in an async mutex. Acquisition holds it while the
//!   engine starts, so a concurrent stop waits for that to settle and then
//!   tears the new session down. A start issued during a stop waits the same
//!   way before acquiring hardware.
//! - Unmount claims a generation synchronously and its background release
//!   only tears down sessions started before it, so a quick remount and
//!   start is unaffected.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::capability;
use crate::config::ScannerConfig;
use crate::device;
use crate::error::{MediaError, ScanError};
use crate::permission;
use crate::platform::{DecodeCallback, DecodeEngine, FrameErrorCallback, MediaHost};
use crate::session::DecodeSession;
use crate::types::{ContainerHandle, ScanStatus, SessionSnapshot, Visibility};

/// Receives decoded text.
pub type ResultCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Why an in-flight start did not reach `Scanning`.
enum StartError {
    Failed(ScanError),
    /// A stop or unmount happened while the start was suspended.
    Superseded,
}

impl From<ScanError> for StartError {
    fn from(err: ScanError) -> Self {
        StartError::Failed(err)
    }
}

/// Holds a latch for the lifetime of the guard.
struct Latch<'a>(&'a AtomicBool);

impl<'a> Latch<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Latch(flag))
    }
}

impl Drop for Latch<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The live session, tagged with the start that created it.
struct LiveSession {
    generation: u64,
    session: DecodeSession,
}

struct Inner {
    host: Arc<dyn MediaHost>,
    engine: Arc<dyn DecodeEngine>,
    container: ContainerHandle,
    config: ScannerConfig,
    on_result: ResultCallback,
    state: watch::Sender<SessionSnapshot>,
    session: Mutex<Option<LiveSession>>,
    starting: AtomicBool,
    stopping: AtomicBool,
    mounted: AtomicBool,
    generation: AtomicU64,
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.mounted.load(Ordering::Acquire) && self.generation.load(Ordering::Acquire) == generation
    }

    /// Claim a new generation and publish `f` in one step under the state
    /// lock. Nothing is published after unmount.
    fn begin(&self, f: impl FnOnce(&mut SessionSnapshot)) -> u64 {
        let mounted = self.mounted.load(Ordering::Acquire);
        let mut generation = 0;
        self.state.send_if_modified(|s| {
            generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            if mounted {
                f(s);
            }
            mounted
        });
        generation
    }

    /// Publish `f` only if `generation` is still the newest operation. The
    /// check runs under the state lock so it cannot interleave with another
    /// publish.
    fn update_if_current(&self, generation: u64, f: impl FnOnce(&mut SessionSnapshot)) -> bool {
        if !self.mounted.load(Ordering::Acquire) {
            tracing::trace!("Scanner unmounted, state update dropped");
            return false;
        }
        self.state.send_if_modified(|s| {
            if self.generation.load(Ordering::Acquire) != generation {
                return false;
            }
            f(s);
            true
        })
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.session.try_lock()
            && let Some(live) = slot.take()
        {
            tracing::debug!("Scanner dropped with a live session, clearing it");
            live.session.clear();
        }
    }
}

/// Owns one scanner's camera lifecycle. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ScanController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ScanController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanController")
            .field("container", &self.inner.container)
            .field("snapshot", &*self.inner.state.borrow())
            .field("mounted", &self.inner.mounted.load(Ordering::Relaxed))
            .finish()
    }
}

impl ScanController {
    /// Create a controller for `container`. Call [`mount`](Self::mount)
    /// before starting.
    pub fn new(
        host: Arc<dyn MediaHost>,
        engine: Arc<dyn DecodeEngine>,
        container: ContainerHandle,
        config: ScannerConfig,
        on_result: ResultCallback,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                host,
                engine,
                container,
                config,
                on_result,
                state,
                session: Mutex::new(None),
                starting: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                mounted: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    pub fn status(&self) -> ScanStatus {
        self.inner.state.borrow().status
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn last_error(&self) -> Option<ScanError> {
        self.inner.state.borrow().last_error.clone()
    }

    /// Watch state changes, for rendering.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn label(&self) -> &str {
        &self.inner.config.label
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.inner.config
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::Acquire)
    }

    /// Arm the controller. State updates are only published while mounted.
    pub fn mount(&self) {
        if self.inner.mounted.swap(true, Ordering::AcqRel) {
            return;
        }
        // Whatever was published before an unmount is stale.
        self.inner.state.send_if_modified(|s| {
            let stale = *s != SessionSnapshot::default();
            if stale {
                *s = SessionSnapshot::default();
            }
            stale
        });
        tracing::debug!("Scanner mounted on {:?}", self.inner.container.id());
    }

    /// Disarm the controller and release the camera in the background.
    ///
    /// No state is published afterwards. The returned handle may be awaited
    /// by callers that need the release to have finished.
    pub fn unmount(&self) -> Option<JoinHandle<()>> {
        if !self.inner.mounted.swap(false, Ordering::AcqRel) {
            return None;
        }
        tracing::debug!("Scanner unmounted from {:?}", self.inner.container.id());

        // Supersedes any in-flight start; nothing is published while unmounted.
        let cutoff = self.inner.begin(|_| {});

        let controller = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(async move {
                controller.release_before(cutoff).await;
            })),
            Err(_) => {
                tracing::warn!("No async runtime at unmount, camera release deferred to drop");
                None
            }
        }
    }

    /// Start scanning.
    ///
    /// Must be called from a user gesture the first time so the browser shows
    /// the permission prompt. Returns once the attempt settles; failures are
    /// reported through the returned status and [`last_error`](Self::last_error).
    pub async fn start(&self) -> ScanStatus {
        let inner = &self.inner;

        if !inner.mounted.load(Ordering::Acquire) {
            tracing::warn!("Start requested on an unmounted scanner, ignoring");
            return self.status();
        }
        let Some(_latch) = Latch::acquire(&inner.starting) else {
            tracing::debug!("Start already in progress, ignoring");
            return self.status();
        };
        let status = self.status();
        if status.is_busy() {
            tracing::debug!("Scanner already {}, ignoring start", status);
            return status;
        }

        let generation = inner.begin(|s| {
            s.status = ScanStatus::Initializing;
            s.device_id = None;
            s.last_error = None;
        });
        tracing::info!("Starting scanner on {:?}", inner.container.id());

        match self.acquire(generation).await {
            Ok(device_id) => {
                tracing::info!("Scanner running on camera {:?}", device_id);
            }
            Err(StartError::Failed(err)) => {
                tracing::warn!(
                    "Scanner failed to start: {:?} ({})",
                    err.kind(),
                    err.detail().unwrap_or("no detail")
                );
                inner.update_if_current(generation, |s| {
                    s.status = ScanStatus::Error;
                    s.device_id = None;
                    s.last_error = Some(err);
                });
            }
            Err(StartError::Superseded) => {
                tracing::debug!("Start superseded by stop or unmount");
                // The superseding stop holds or is queued on the slot; once it
                // is free any session this start opened has been released.
                drop(inner.session.lock().await);
                return ScanStatus::Idle;
            }
        }

        self.status()
    }

    fn ensure_current(&self, generation: u64) -> Result<(), StartError> {
        if self.inner.is_current(generation) {
            Ok(())
        } else {
            Err(StartError::Superseded)
        }
    }

    async fn acquire(&self, generation: u64) -> Result<Option<String>, StartError> {
        let inner = &self.inner;
        let timing = &inner.config.timing;

        // Anything a previous attempt left behind must be gone before the
        // camera is requested again.
        self.teardown().await;
        tokio::time::sleep(timing.restart_settle()).await;
        self.ensure_current(generation)?;

        capability::probe(inner.host.as_ref())?;

        permission::negotiate(inner.host.as_ref(), timing.preflight_settle()).await?;
        self.ensure_current(generation)?;

        let plan =
            device::resolve(inner.engine.as_ref(), &inner.config.back_camera_keywords).await?;
        self.ensure_current(generation)?;

        let mut slot = inner.session.lock().await;
        self.ensure_current(generation)?;

        let session = DecodeSession::attach(
            inner.engine.as_ref(),
            &inner.container,
            &inner.config.session_options(),
        )?;
        let on_decode = self.decode_callback(generation);
        let on_frame_error: FrameErrorCallback = Arc::new(|e: MediaError| {
            tracing::trace!("Frame not decoded: {}", e);
        });

        let device_id = match device::start_with_plan(&session, &plan, on_decode, on_frame_error)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                session.clear();
                return Err(err.into());
            }
        };

        // Stored before publishing so a stop that supersedes from here on
        // always finds it. A stop that already superseded is waiting on this
        // lock and tears it down.
        *slot = Some(LiveSession {
            generation,
            session,
        });
        drop(slot);

        let published = inner.update_if_current(generation, |s| {
            s.status = ScanStatus::Scanning;
            s.device_id = device_id.clone();
        });
        if !published {
            return Err(StartError::Superseded);
        }

        Ok(device_id)
    }

    /// Wrap the result callback for one start cycle.
    fn decode_callback(&self, generation: u64) -> DecodeCallback {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let auto_stop = self.inner.config.auto_stop_on_scan;
        let delivered = Arc::new(AtomicBool::new(false));
        let runtime = tokio::runtime::Handle::current();

        Arc::new(move |text: String| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.is_current(generation) {
                tracing::trace!("Decode from a stale session dropped");
                return;
            }
            if !auto_stop {
                (inner.on_result)(text);
                return;
            }
            if delivered.swap(true, Ordering::AcqRel) {
                tracing::trace!("Duplicate decode while stopping dropped");
                return;
            }

            tracing::info!("Symbol decoded, stopping scanner before delivery");
            let controller = ScanController::from_inner(inner);
            runtime.spawn(async move {
                controller.stop().await;
                if controller.is_mounted() {
                    (controller.inner.on_result)(text);
                }
            });
        })
    }

    /// Stop scanning and release the camera. Never fails; safe to call at any
    /// time and from several places at once.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let generation = inner.begin(|_| {});

        match Latch::acquire(&inner.stopping) {
            Some(_latch) => self.teardown().await,
            None => {
                tracing::debug!("Stop already in progress, waiting for it");
                drop(inner.session.lock().await);
            }
        }

        // A newer start or stop owns the visible state from here.
        inner.update_if_current(generation, |s| {
            s.status = ScanStatus::Idle;
            s.device_id = None;
        });
    }

    /// Release a session started before `cutoff`. Sessions from a later
    /// mount belong to that mount and are left alone.
    async fn release_before(&self, cutoff: u64) {
        let mut slot = self.inner.session.lock().await;
        match slot.take_if(|live| live.generation < cutoff) {
            Some(live) => Self::shutdown(live.session).await,
            None => tracing::debug!("Nothing left to release after unmount"),
        }
    }

    /// Stop and clear the current session, if any.
    async fn teardown(&self) {
        let mut slot = self.inner.session.lock().await;
        if let Some(live) = slot.take() {
            Self::shutdown(live.session).await;
        }
    }

    /// Errors are logged.
    async fn shutdown(session: DecodeSession) {
        if session.is_active() {
            match session.stop().await {
                Ok(()) => tracing::info!("Camera released"),
                Err(e) => tracing::debug!("Ignoring error while stopping camera: {}", e),
            }
        } else {
            tracing::debug!("Session already inactive, skipping stop");
        }
        session.clear();
    }

    /// React to a page visibility change. Hidden pages lose the camera;
    /// becoming visible again does not restart it.
    pub async fn handle_visibility(&self, visibility: Visibility) {
        if visibility == Visibility::Hidden {
            if self.status().is_busy() {
                tracing::info!("Page hidden, stopping scanner");
            }
            self.stop().await;
        }
    }

    /// Listen for visibility changes until the sender or the controller is
    /// dropped.
    pub fn watch_visibility(&self, mut visibility: watch::Receiver<Visibility>) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while visibility.changed().await.is_ok() {
                let current = *visibility.borrow_and_update();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                ScanController::from_inner(inner)
                    .handle_visibility(current)
                    .await;
            }
        })
    }
}
