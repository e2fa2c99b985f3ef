//! Wrapper around one attached decode-engine session.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{MediaError, ScanError};
use crate::platform::{DecodeCallback, DecodeEngine, EngineSession, FrameErrorCallback};
use crate::types::{AttachOptions, ContainerHandle, DetectionBox, DeviceSelector, ScanConfig};

/// Square detection box sized relative to the container width.
pub fn detection_box(container_width: u32, ratio: f32, min: u32, max: u32) -> DetectionBox {
    let side = (container_width as f32 * ratio).floor() as u32;
    DetectionBox::square(side.clamp(min, max.max(min)))
}

/// Options that shape an attached session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub attach: AttachOptions,
    pub fps: u32,
    pub box_ratio: f32,
    pub min_box_size: u32,
    pub max_box_size: u32,
    /// Delay before the inline-playback fixup is applied.
    pub inline_fixup_delay: Duration,
}

/// A decode session bound to a container.
pub struct DecodeSession {
    inner: Arc<dyn EngineSession>,
    scan_config: ScanConfig,
    inline_fixup_delay: Duration,
}

impl DecodeSession {
    /// Attach the engine to `container`.
    pub fn attach(
        engine: &dyn DecodeEngine,
        container: &ContainerHandle,
        options: &SessionOptions,
    ) -> Result<Self, ScanError> {
        let inner = engine.attach(container, &options.attach)?;
        let scan_config = ScanConfig {
            fps: options.fps,
            detection_box: detection_box(
                container.width(),
                options.box_ratio,
                options.min_box_size,
                options.max_box_size,
            ),
        };
        tracing::debug!(
            "Attached decode engine to {:?} with {}px box at {} fps",
            container.id(),
            scan_config.detection_box.width,
            scan_config.fps
        );
        Ok(Self {
            inner,
            scan_config,
            inline_fixup_delay: options.inline_fixup_delay,
        })
    }

    pub fn scan_config(&self) -> &ScanConfig {
        &self.scan_config
    }

    /// Start capture on `device`.
    pub async fn start(
        &self,
        device: &DeviceSelector,
        on_decode: DecodeCallback,
        on_frame_error: FrameErrorCallback,
    ) -> Result<(), MediaError> {
        self.inner
            .start(device, &self.scan_config, on_decode, on_frame_error)
            .await?;
        self.schedule_inline_fixup();
        Ok(())
    }

    fn schedule_inline_fixup(&self) {
        let inner = self.inner.clone();
        let delay = self.inline_fixup_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.state().is_active() {
                inner.enable_inline_playback();
            }
        });
    }

    /// Whether the engine currently holds the camera.
    pub fn is_active(&self) -> bool {
        self.inner.state().is_active()
    }

    /// Request a graceful stop.
    pub async fn stop(&self) -> Result<(), MediaError> {
        self.inner.stop().await
    }

    /// Release engine resources attached to the container.
    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl std::fmt::Debug for DecodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeSession")
            .field("state", &self.inner.state())
            .field("scan_config", &self.scan_config)
            .finish()
    }
}
