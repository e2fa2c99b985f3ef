//! Camera acquisition and barcode-decoding lifecycle management.
//!
//! This crate provides:
//! - The scan lifecycle controller (`controller` module)
//! - Capability, permission and device negotiation (`capability`, `permission`, `device`)
//! - A wrapper around an external decode engine (`session` module)
//! - Error classification into user guidance (`error` module)
//! - Platform seams for the host media API and decode engine (`platform` module)
//! - Scanner configuration (`config` module)
//!
//! With the `persistence` feature enabled, configuration can be loaded from
//! and saved to the platform config directory.

pub mod capability;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod permission;
pub mod platform;
pub mod session;
pub mod types;

pub use config::{ConfigError, ScannerConfig, SettleTimings};
pub use controller::{ResultCallback, ScanController};
pub use error::{ErrorKind, MediaError, ScanError};
pub use platform::{
    DecodeCallback, DecodeEngine, EngineSession, FrameErrorCallback, MediaHost, MediaStream,
    MediaTrack,
};
pub use types::*;

#[cfg(feature = "persistence")]
pub use config::{get_config_path, load_config, save_config};
