//! Camera error taxonomy.
//!
//! Every failure raised by the host media API or the decode engine is
//! classified into an [`ErrorKind`] with a fixed user-facing message. Raw
//! native text is kept as log detail only.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw error crossing the platform seam, shaped like a DOM exception.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{name}: {message}")]
pub struct MediaError {
    pub name: String,
    pub message: String,
}

impl MediaError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// An error with a name and no message.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }
}

/// Classified camera failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Page not served over HTTPS (or localhost).
    InsecureContext,
    /// No media API in this environment.
    Unsupported,
    /// The user or OS refused camera access.
    PermissionDenied,
    /// No video input device.
    NoCamera,
    /// The camera exists but could not be opened, usually held by another app.
    DeviceBusy,
    /// The requested camera or constraints cannot be satisfied.
    ConstraintUnsatisfiable,
    /// Acquisition was interrupted.
    Aborted,
    /// Anything else.
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::InsecureContext,
        ErrorKind::Unsupported,
        ErrorKind::PermissionDenied,
        ErrorKind::NoCamera,
        ErrorKind::DeviceBusy,
        ErrorKind::ConstraintUnsatisfiable,
        ErrorKind::Aborted,
        ErrorKind::Unknown,
    ];

    /// Classify a raw media error by its name, then by message tokens.
    pub fn classify(err: &MediaError) -> Self {
        let text = format!("{} {}", err.name, err.message).to_lowercase();

        if err.name == "SecurityError"
            || text.contains("insecure_context")
            || text.contains("insecure context")
        {
            return ErrorKind::InsecureContext;
        }

        match err.name.as_str() {
            "NotAllowedError" | "PermissionDeniedError" => return ErrorKind::PermissionDenied,
            "NotFoundError" | "DevicesNotFoundError" => return ErrorKind::NoCamera,
            "NotReadableError" | "TrackStartError" => return ErrorKind::DeviceBusy,
            "OverconstrainedError" | "ConstraintNotSatisfiedError" => {
                return ErrorKind::ConstraintUnsatisfiable;
            }
            "AbortError" => return ErrorKind::Aborted,
            "NotSupportedError" => return ErrorKind::Unsupported,
            _ => {}
        }

        if text.contains("permission denied") || text.contains("not allowed") {
            ErrorKind::PermissionDenied
        } else if text.contains("no camera")
            || text.contains("device not found")
            || text.contains("no video input")
        {
            ErrorKind::NoCamera
        } else if text.contains("could not start video source")
            || text.contains("in use")
            || text.contains("busy")
        {
            ErrorKind::DeviceBusy
        } else if text.contains("not supported") {
            ErrorKind::Unsupported
        } else {
            ErrorKind::Unknown
        }
    }

    /// Short title for the error banner.
    pub fn title(&self) -> &'static str {
        match self {
            ErrorKind::InsecureContext => "Secure Connection Required",
            ErrorKind::Unsupported => "Camera Not Supported",
            ErrorKind::PermissionDenied => "Camera Permission Denied",
            ErrorKind::NoCamera => "No Camera Found",
            ErrorKind::DeviceBusy => "Camera Unavailable",
            ErrorKind::ConstraintUnsatisfiable => "Camera Not Usable",
            ErrorKind::Aborted => "Camera Start Cancelled",
            ErrorKind::Unknown => "Camera Error",
        }
    }

    /// User-facing explanation.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::InsecureContext => {
                "The camera requires a secure connection. Open the app through its https link."
            }
            ErrorKind::Unsupported => "This browser does not support camera access.",
            ErrorKind::PermissionDenied => {
                "Camera permission was denied. Allow camera access and try again."
            }
            ErrorKind::NoCamera => "No camera was found on this device.",
            ErrorKind::DeviceBusy => {
                "The camera is unavailable and may be in use by another app. Close other apps and try again."
            }
            ErrorKind::ConstraintUnsatisfiable => {
                "The preferred camera could not be used. Try again or pick another camera."
            }
            ErrorKind::Aborted => "Camera start-up was interrupted. Try again.",
            ErrorKind::Unknown => "The camera could not be opened.",
        }
    }

    /// Suggested action for the user.
    pub fn suggestion(&self) -> &'static str {
        match self {
            ErrorKind::InsecureContext => "Switch to the https address of this app.",
            ErrorKind::Unsupported => "Use an up-to-date browser such as Chrome or Safari.",
            ErrorKind::PermissionDenied => {
                "Enable the camera for this site in the browser or system settings."
            }
            ErrorKind::NoCamera => "Connect a camera or use a device that has one.",
            ErrorKind::DeviceBusy => "Close other apps using the camera, then retry.",
            ErrorKind::ConstraintUnsatisfiable => "Retry; another camera will be tried.",
            ErrorKind::Aborted => "Retry the scan.",
            ErrorKind::Unknown => "Retry, or reload the page if the problem persists.",
        }
    }

    /// Whether offering a retry action makes sense.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ErrorKind::InsecureContext | ErrorKind::Unsupported)
    }

    /// Failures that no later acquisition in the same attempt can get past.
    pub fn blocks_acquisition(&self) -> bool {
        matches!(
            self,
            ErrorKind::InsecureContext | ErrorKind::Unsupported | ErrorKind::PermissionDenied
        )
    }
}

/// A classified scanner error. `Display` is always the user message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", .kind.message())]
pub struct ScanError {
    kind: ErrorKind,
    detail: Option<String>,
}

impl ScanError {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, detail: None }
    }

    /// Attach raw detail for logs.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn title(&self) -> &'static str {
        self.kind.title()
    }

    pub fn message(&self) -> &'static str {
        self.kind.message()
    }

    /// Raw error text, for logs only.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl From<MediaError> for ScanError {
    fn from(err: MediaError) -> Self {
        ScanError::new(ErrorKind::classify(&err)).with_detail(err.to_string())
    }
}

impl From<&MediaError> for ScanError {
    fn from(err: &MediaError) -> Self {
        ScanError::new(ErrorKind::classify(err)).with_detail(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn kind_of(name: &str) -> ErrorKind {
        ErrorKind::classify(&MediaError::named(name))
    }

    #[test]
    fn test_classify_by_name() {
        assert_eq!(kind_of("SecurityError"), ErrorKind::InsecureContext);
        assert_eq!(kind_of("NotAllowedError"), ErrorKind::PermissionDenied);
        assert_eq!(kind_of("PermissionDeniedError"), ErrorKind::PermissionDenied);
        assert_eq!(kind_of("NotFoundError"), ErrorKind::NoCamera);
        assert_eq!(kind_of("DevicesNotFoundError"), ErrorKind::NoCamera);
        assert_eq!(kind_of("NotReadableError"), ErrorKind::DeviceBusy);
        assert_eq!(kind_of("TrackStartError"), ErrorKind::DeviceBusy);
        assert_eq!(kind_of("OverconstrainedError"), ErrorKind::ConstraintUnsatisfiable);
        assert_eq!(kind_of("AbortError"), ErrorKind::Aborted);
        assert_eq!(kind_of("NotSupportedError"), ErrorKind::Unsupported);
    }

    #[test]
    fn test_classify_by_message_tokens() {
        let insecure = MediaError::new("Error", "SecurityError: insecure_context");
        assert_eq!(ErrorKind::classify(&insecure), ErrorKind::InsecureContext);

        let no_camera = MediaError::new("Error", "No camera found on this device");
        assert_eq!(ErrorKind::classify(&no_camera), ErrorKind::NoCamera);

        let busy = MediaError::new("Error", "Could not start video source");
        assert_eq!(ErrorKind::classify(&busy), ErrorKind::DeviceBusy);
    }

    #[test]
    fn test_unrecognized_error_is_unknown() {
        let err = MediaError::new("TypeError", "undefined is not a function");
        assert_eq!(ErrorKind::classify(&err), ErrorKind::Unknown);
    }

    #[test]
    fn test_messages_are_distinct_and_non_empty() {
        let messages: HashSet<_> = ErrorKind::ALL.iter().map(|k| k.message()).collect();
        assert_eq!(messages.len(), ErrorKind::ALL.len());
        for kind in ErrorKind::ALL {
            assert!(!kind.message().is_empty());
            assert!(!kind.title().is_empty());
            assert!(!kind.suggestion().is_empty());
        }
    }

    #[test]
    fn test_specific_messages_differ_from_fallback() {
        for kind in ErrorKind::ALL.iter().filter(|k| **k != ErrorKind::Unknown) {
            assert_ne!(kind.message(), ErrorKind::Unknown.message());
        }
    }

    #[test]
    fn test_scan_error_display_hides_native_text() {
        let err = ScanError::from(MediaError::new("NotAllowedError", "Permission dismissed"));
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(err.to_string(), ErrorKind::PermissionDenied.message());
        assert!(!err.to_string().contains("dismissed"));
        assert_eq!(
            err.detail(),
            Some("NotAllowedError: Permission dismissed")
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(!ErrorKind::InsecureContext.is_recoverable());
        assert!(!ErrorKind::Unsupported.is_recoverable());
        assert!(ErrorKind::PermissionDenied.is_recoverable());
        assert!(ErrorKind::DeviceBusy.is_recoverable());
    }

    #[test]
    fn test_blocks_acquisition() {
        assert!(ErrorKind::PermissionDenied.blocks_acquisition());
        assert!(!ErrorKind::DeviceBusy.blocks_acquisition());
        assert!(!ErrorKind::Unknown.blocks_acquisition());
    }

    proptest! {
        #[test]
        fn prop_unrecognized_names_fall_back(name in "[A-Z][ac-x]{3,12}Failure") {
            let kind = ErrorKind::classify(&MediaError::named(name));
            prop_assert_eq!(kind, ErrorKind::Unknown);
            prop_assert!(!kind.message().is_empty());
        }
    }
}
