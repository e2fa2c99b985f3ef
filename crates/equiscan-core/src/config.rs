//! Scanner configuration.
//!
//! Every field has a default so partial config files keep working. The settle
//! delays are empirical; correct values depend on device and browser, so they
//! are configuration rather than constants.
//!
//! With the `persistence` feature, configuration is read from and written to
//! `config.json` in the platform config directory.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::DEFAULT_BACK_KEYWORDS;
use crate::session::SessionOptions;
use crate::types::AttachOptions;

/// Configuration error type.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Invalid value.
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
    /// Other configuration error.
    #[error("{0}")]
    Other(String),
}

/// Delays inserted around hardware acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleTimings {
    /// Pause between stopping a previous session and acquiring again.
    pub restart_settle_ms: u64,
    /// Pause after releasing the permission preflight stream.
    pub preflight_settle_ms: u64,
    /// Delay before applying the inline-playback fixup.
    pub inline_fixup_delay_ms: u64,
}

impl Default for SettleTimings {
    fn default() -> Self {
        Self {
            restart_settle_ms: 300,
            preflight_settle_ms: 150,
            inline_fixup_delay_ms: 100,
        }
    }
}

impl SettleTimings {
    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    pub fn preflight_settle(&self) -> Duration {
        Duration::from_millis(self.preflight_settle_ms)
    }

    pub fn inline_fixup_delay(&self) -> Duration {
        Duration::from_millis(self.inline_fixup_delay_ms)
    }
}

/// Scanner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Stop the camera after the first decoded symbol.
    pub auto_stop_on_scan: bool,
    /// Prompt shown above the scanner.
    pub label: String,
    /// Frames sampled per second.
    pub fps: u32,
    /// Detection box side as a fraction of the container width.
    pub box_ratio: f32,
    pub min_box_size: u32,
    pub max_box_size: u32,
    /// Label substrings identifying a rear camera.
    pub back_camera_keywords: Vec<String>,
    /// Ask the decode engine for verbose logging.
    pub verbose_engine: bool,
    pub timing: SettleTimings,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            auto_stop_on_scan: true,
            label: "Scan the QR code".to_string(),
            fps: 10,
            box_ratio: 0.7,
            min_box_size: 50,
            max_box_size: 250,
            back_camera_keywords: DEFAULT_BACK_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            verbose_engine: false,
            timing: SettleTimings::default(),
        }
    }
}

impl ScannerConfig {
    /// Reject values the decode engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fps == 0 {
            return Err(ConfigError::Invalid {
                field: "fps",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.box_ratio > 0.0 && self.box_ratio <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "box_ratio",
                reason: format!("{} is outside (0, 1]", self.box_ratio),
            });
        }
        if self.min_box_size > self.max_box_size {
            return Err(ConfigError::Invalid {
                field: "min_box_size",
                reason: format!(
                    "{} is larger than max_box_size {}",
                    self.min_box_size, self.max_box_size
                ),
            });
        }
        Ok(())
    }

    /// Options for attaching a decode session.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            attach: AttachOptions {
                verbose: self.verbose_engine,
            },
            fps: self.fps,
            box_ratio: self.box_ratio,
            min_box_size: self.min_box_size,
            max_box_size: self.max_box_size,
            inline_fixup_delay: self.timing.inline_fixup_delay(),
        }
    }
}

// ==================== Config I/O ====================

#[cfg(feature = "persistence")]
mod io {
    use super::{ConfigError, ScannerConfig};
    use directories::ProjectDirs;
    use std::fs;
    use std::path::PathBuf;

    /// Get the config file path.
    pub fn get_config_path() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("dev", "equiscan", "equiscan")
            .map(|dirs| dirs.config_dir().join("config.json"))
            .ok_or_else(|| ConfigError::Other("Could not determine config directory".to_string()))
    }

    /// Load configuration from disk. A missing file yields the defaults.
    pub fn load_config() -> Result<ScannerConfig, ConfigError> {
        let path = get_config_path()?;
        if !path.exists() {
            return Ok(ScannerConfig::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: ScannerConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to disk.
    pub fn save_config(config: &ScannerConfig) -> Result<PathBuf, ConfigError> {
        let path = get_config_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(config)?;
        fs::write(&path, content)?;
        Ok(path)
    }
}

#[cfg(feature = "persistence")]
pub use io::{get_config_path, load_config, save_config};

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ScannerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_keywords() {
        let config = ScannerConfig::default();
        assert!(config.back_camera_keywords.contains(&"back".to_string()));
        assert!(config.back_camera_keywords.contains(&"environment".to_string()));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ScannerConfig =
            serde_json::from_str(r#"{"fps": 15, "timing": {"restart_settle_ms": 500}}"#).unwrap();
        assert_eq!(config.fps, 15);
        assert_eq!(config.timing.restart_settle(), Duration::from_millis(500));
        assert_eq!(config.timing.preflight_settle_ms, 150);
        assert!(config.auto_stop_on_scan);
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = ScannerConfig::default();
        config.auto_stop_on_scan = false;
        config.label = "Scan equipment tag".to_string();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ScannerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects_zero_fps() {
        let config = ScannerConfig {
            fps: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "fps", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        for ratio in [0.0, -0.5, 1.5, f32::NAN] {
            let config = ScannerConfig {
                box_ratio: ratio,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "ratio {ratio} accepted");
        }
    }

    #[test]
    fn test_validate_rejects_inverted_box_bounds() {
        let config = ScannerConfig {
            min_box_size: 300,
            max_box_size: 200,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_options_carry_timing() {
        let options = ScannerConfig::default().session_options();
        assert_eq!(options.fps, 10);
        assert_eq!(options.inline_fixup_delay, Duration::from_millis(100));
    }
}
