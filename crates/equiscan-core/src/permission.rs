//! Permission preflight.
//!
//! Browsers only show the camera prompt, and only expose device labels, after
//! a successful `getUserMedia`. A throwaway stream is requested at the user
//! gesture boundary and released before the real acquisition.

use std::time::Duration;

use crate::error::ScanError;
use crate::platform::{MediaHost, MediaStream};
use crate::types::MediaConstraints;

/// Scoped ownership of a preflight stream. Every track is stopped on drop.
pub struct PermissionProbe {
    stream: Option<Box<dyn MediaStream>>,
}

impl PermissionProbe {
    pub fn new(stream: Box<dyn MediaStream>) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    /// Stop every track. Returns how many tracks were stopped.
    pub fn release(&mut self) -> usize {
        let Some(stream) = self.stream.take() else {
            return 0;
        };
        let tracks = stream.tracks();
        for track in &tracks {
            track.stop();
        }
        tracks.len()
    }
}

impl Drop for PermissionProbe {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PermissionProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionProbe")
            .field("held", &self.stream.is_some())
            .finish()
    }
}

/// Constraints for the preflight request.
pub fn preflight_constraints(host: &dyn MediaHost) -> MediaConstraints {
    if host.is_probably_mobile() {
        MediaConstraints::rear_camera()
    } else {
        MediaConstraints::any_camera()
    }
}

/// Trigger the permission prompt and release the camera again.
///
/// Failures are logged and swallowed unless they cannot be overcome by the
/// real acquisition (denied permission, insecure context, missing API).
pub async fn negotiate(host: &dyn MediaHost, settle: Duration) -> Result<(), ScanError> {
    let constraints = preflight_constraints(host);

    match host.get_user_media(&constraints).await {
        Ok(stream) => {
            let stopped = PermissionProbe::new(stream).release();
            tracing::debug!("Permission preflight granted, released {} track(s)", stopped);
            tokio::time::sleep(settle).await;
            Ok(())
        }
        Err(e) => {
            let err = ScanError::from(&e);
            if err.kind().blocks_acquisition() {
                tracing::warn!("Permission preflight failed: {:?} ({})", err.kind(), e);
                return Err(err);
            }
            tracing::warn!(
                "Permission preflight failed ({}), continuing with real acquisition",
                e
            );
            Ok(())
        }
    }
}
