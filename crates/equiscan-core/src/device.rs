//! Camera enumeration and rear-camera preference.
//!
//! Label matching is a heuristic: labels are only available after permission
//! and are not always localized in English. When nothing matches, the last
//! enumerated device is used because phones without descriptive labels tend
//! to list the rear camera last.

use crate::error::{ErrorKind, ScanError};
use crate::platform::{DecodeCallback, DecodeEngine, FrameErrorCallback};
use crate::session::DecodeSession;
use crate::types::{CameraDescriptor, DeviceSelector, FacingMode};

/// Label substrings that identify a rear camera.
pub const DEFAULT_BACK_KEYWORDS: &[&str] = &["back", "rear", "environment", "traseira"];

/// Which camera to try first, and which one to fall back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePlan {
    pub preferred: DeviceSelector,
    pub fallback: Option<DeviceSelector>,
}

impl DevicePlan {
    /// Used when enumeration is unavailable.
    pub fn facing_mode() -> Self {
        Self {
            preferred: DeviceSelector::Facing(FacingMode::Environment),
            fallback: None,
        }
    }
}

/// First camera whose label contains a keyword, else the last camera.
pub fn select_preferred<'a, S: AsRef<str>>(
    cameras: &'a [CameraDescriptor],
    keywords: &[S],
) -> Option<&'a CameraDescriptor> {
    cameras
        .iter()
        .find(|camera| {
            let label = camera.label.to_lowercase();
            keywords
                .iter()
                .any(|k| label.contains(&k.as_ref().to_lowercase()))
        })
        .or_else(|| cameras.last())
}

/// Build a plan from an enumeration result.
pub fn plan<S: AsRef<str>>(
    cameras: &[CameraDescriptor],
    keywords: &[S],
) -> Result<DevicePlan, ScanError> {
    let preferred = select_preferred(cameras, keywords)
        .ok_or_else(|| ScanError::new(ErrorKind::NoCamera).with_detail("no video input devices"))?;

    let fallback = cameras
        .first()
        .filter(|first| first.id != preferred.id)
        .map(|first| DeviceSelector::Id(first.id.clone()));

    Ok(DevicePlan {
        preferred: DeviceSelector::Id(preferred.id.clone()),
        fallback,
    })
}

/// Enumerate cameras and turn the result into a plan.
///
/// An enumeration failure that does not block acquisition degrades to the
/// facing-mode selector instead of failing the attempt.
pub async fn resolve<S: AsRef<str>>(
    engine: &dyn DecodeEngine,
    keywords: &[S],
) -> Result<DevicePlan, ScanError> {
    match engine.list_devices().await {
        Ok(cameras) => {
            tracing::info!("Found {} camera(s)", cameras.len());
            for camera in &cameras {
                tracing::debug!("Camera {:?}: {:?}", camera.id, camera.label);
            }
            plan(&cameras, keywords)
        }
        Err(e) => {
            let err = ScanError::from(&e);
            if err.kind().blocks_acquisition() {
                return Err(err);
            }
            tracing::warn!("Camera enumeration failed ({}), using facing mode", e);
            Ok(DevicePlan::facing_mode())
        }
    }
}

/// Start the session on the preferred camera, retrying once on the fallback.
///
/// Returns the device id that was opened, if any.
pub async fn start_with_plan(
    session: &DecodeSession,
    plan: &DevicePlan,
    on_decode: DecodeCallback,
    on_frame_error: FrameErrorCallback,
) -> Result<Option<String>, ScanError> {
    let first_err = match session
        .start(&plan.preferred, on_decode.clone(), on_frame_error.clone())
        .await
    {
        Ok(()) => return Ok(plan.preferred.device_id().map(str::to_owned)),
        Err(e) => e,
    };

    let Some(fallback) = &plan.fallback else {
        return Err(ScanError::from(first_err));
    };

    tracing::warn!(
        "Camera {:?} failed to start ({}), retrying with {:?}",
        plan.preferred,
        first_err,
        fallback
    );

    session
        .start(fallback, on_decode, on_frame_error)
        .await
        .map(|()| fallback.device_id().map(str::to_owned))
        .map_err(ScanError::from)
}
