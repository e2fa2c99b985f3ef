//! Seams to the host media API and the external decode engine.
//!
//! The controller only talks to these traits. A browser build backs them with
//! `getUserMedia` and a JS decoding library; the desktop binary backs them
//! with a native camera and `rqrr`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MediaError;
use crate::types::{
    AttachOptions, CameraDescriptor, ContainerHandle, DeviceSelector, EngineState,
    MediaConstraints, ScanConfig,
};

/// Invoked by the engine with the text of each decoded symbol.
pub type DecodeCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Invoked by the engine for frames that failed to decode.
pub type FrameErrorCallback = Arc<dyn Fn(MediaError) + Send + Sync>;

/// One track of a media stream.
pub trait MediaTrack: Send + Sync {
    /// Release the underlying device. Must be idempotent.
    fn stop(&self);

    fn is_live(&self) -> bool;
}

/// A stream returned by [`MediaHost::get_user_media`].
pub trait MediaStream: Send + Sync {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;
}

/// Host platform media API.
#[async_trait]
pub trait MediaHost: Send + Sync {
    /// `window.isSecureContext`.
    fn is_secure_context(&self) -> bool;

    /// Whether `navigator.mediaDevices.getUserMedia` exists.
    fn has_media_devices(&self) -> bool;

    /// Touch devices get a rear-camera preference on the permission request.
    fn is_probably_mobile(&self) -> bool {
        false
    }

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Box<dyn MediaStream>, MediaError>;
}

/// External decoding engine.
#[async_trait]
pub trait DecodeEngine: Send + Sync {
    /// Enumerate video input devices.
    async fn list_devices(&self) -> Result<Vec<CameraDescriptor>, MediaError>;

    /// Bind the engine to a render target.
    fn attach(
        &self,
        container: &ContainerHandle,
        options: &AttachOptions,
    ) -> Result<Arc<dyn EngineSession>, MediaError>;
}

/// A capture + decode loop bound to one container.
#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Open the camera and begin decoding. Resolves once frames are flowing.
    async fn start(
        &self,
        device: &DeviceSelector,
        config: &ScanConfig,
        on_decode: DecodeCallback,
        on_frame_error: FrameErrorCallback,
    ) -> Result<(), MediaError>;

    /// Stop capture and release the camera. Errors if not running.
    async fn stop(&self) -> Result<(), MediaError>;

    fn state(&self) -> EngineState;

    /// Drop render resources attached to the container.
    fn clear(&self);

    /// Mark the video element inline, muted and autoplaying so iOS Safari
    /// keeps it out of fullscreen. Engines without a video element ignore it.
    fn enable_inline_playback(&self) {}
}
