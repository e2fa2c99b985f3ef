//! Core types shared by the scanner components.

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Visible state of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScanStatus {
    /// No camera is held.
    #[default]
    Idle,
    /// Permission, enumeration or acquisition is in flight.
    Initializing,
    /// The decode engine is capturing frames.
    Scanning,
    /// The last attempt failed; see `SessionSnapshot::last_error`.
    Error,
}

impl ScanStatus {
    /// Get display label.
    pub fn label(&self) -> &'static str {
        match self {
            ScanStatus::Idle => "Idle",
            ScanStatus::Initializing => "Starting camera",
            ScanStatus::Scanning => "Scanning",
            ScanStatus::Error => "Error",
        }
    }

    /// Whether a camera acquisition is in flight or held.
    pub fn is_busy(&self) -> bool {
        matches!(self, ScanStatus::Initializing | ScanStatus::Scanning)
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A video input device as reported by the decode engine.
///
/// `label` is empty until camera permission has been granted at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub id: String,
    pub label: String,
}

impl CameraDescriptor {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Camera facing direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacingMode {
    /// Rear camera on phones and tablets.
    Environment,
    /// Front (selfie) camera.
    User,
}

impl FacingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacingMode::Environment => "environment",
            FacingMode::User => "user",
        }
    }
}

/// Which camera a decode session should open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// An enumerated device id.
    Id(String),
    /// Let the platform pick by facing direction.
    Facing(FacingMode),
}

impl DeviceSelector {
    /// The device id, if this selector names one.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            DeviceSelector::Id(id) => Some(id),
            DeviceSelector::Facing(_) => None,
        }
    }
}

/// Video part of a media request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoConstraint {
    /// Any camera (`video: true`).
    Any,
    /// Prefer a facing direction (`video: {facingMode: {ideal: ...}}`).
    Facing { ideal: FacingMode },
}

/// Constraints for a host media request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: VideoConstraint,
    pub audio: bool,
}

impl MediaConstraints {
    /// `{video: {facingMode: {ideal: "environment"}}, audio: false}`.
    pub fn rear_camera() -> Self {
        Self {
            video: VideoConstraint::Facing {
                ideal: FacingMode::Environment,
            },
            audio: false,
        }
    }

    /// `{video: true, audio: false}`.
    pub fn any_camera() -> Self {
        Self {
            video: VideoConstraint::Any,
            audio: false,
        }
    }
}

/// Render target the decode engine attaches its video output to.
///
/// Deliberately not `Clone`: a container belongs to exactly one controller.
#[derive(Debug, PartialEq, Eq)]
pub struct ContainerHandle {
    id: String,
    width: u32,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, width: u32) -> Self {
        Self {
            id: id.into(),
            width,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Rendered width in CSS pixels.
    pub fn width(&self) -> u32 {
        self.width
    }
}

/// Options passed when attaching the engine to a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachOptions {
    /// Ask the engine for verbose logging.
    pub verbose: bool,
}

/// Internal state reported by the decode engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    NotStarted,
    Scanning,
    Paused,
    Unknown,
}

impl EngineState {
    /// Whether the engine holds the camera.
    pub fn is_active(self) -> bool {
        matches!(self, EngineState::Scanning | EngineState::Paused)
    }
}

/// Square region of the video the engine decodes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionBox {
    pub width: u32,
    pub height: u32,
}

impl DetectionBox {
    pub fn square(side: u32) -> Self {
        Self {
            width: side,
            height: side,
        }
    }
}

/// Per-start engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Frames sampled per second.
    pub fps: u32,
    pub detection_box: DetectionBox,
}

/// Page visibility as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Published state of a controller, for rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: ScanStatus,
    /// Camera in use, `None` when idle or when opened by facing mode.
    pub device_id: Option<String>,
    /// Cleared when a new attempt starts.
    pub last_error: Option<ScanError>,
}
