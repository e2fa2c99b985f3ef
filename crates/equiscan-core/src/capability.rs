//! Environment checks made before any hardware request.

use crate::error::{ErrorKind, ScanError};
use crate::platform::MediaHost;

/// Check that the host can acquire a camera at all.
///
/// Secure context is checked first: insecure pages often hide the media API
/// entirely, and "use https" is the actionable message in that case.
pub fn probe(host: &dyn MediaHost) -> Result<(), ScanError> {
    if !host.is_secure_context() {
        return Err(ScanError::new(ErrorKind::InsecureContext).with_detail("insecure_context"));
    }
    if !host.has_media_devices() {
        return Err(ScanError::new(ErrorKind::Unsupported).with_detail("mediaDevices missing"));
    }
    Ok(())
}
