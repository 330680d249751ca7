//! Configuration management for camdeck.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults. All
//! values are resolved once at startup and treated as immutable afterwards.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default config directory name.
const CONFIG_DIR_NAME: &str = "camdeck";

/// Environment variable prefix. Nested keys are separated by `__`.
const ENV_PREFIX: &str = "CAMDECK_";

/// Fallback environment variable for the Gemini credential.
const GEMINI_KEY_ENV: &str = "GEMINI_API_KEY";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `CAMDECK_`, nested with `__`)
/// 2. TOML config file at `~/.config/camdeck/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Rate governor configuration.
    pub governor: GovernorConfig,
    /// Per-operation admission costs.
    pub costs: CostConfig,
    /// Camera configuration.
    pub camera: CameraConfig,
    /// Code analysis configuration.
    pub analysis: AnalysisConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the API and control panel listen on.
    pub bind: SocketAddr,
}

/// Token-bucket parameters, applied uniformly per caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Maximum number of tokens a bucket holds.
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_per_sec: f64,
    /// Minimum idle time before a fully refilled bucket may be evicted.
    pub idle_eviction_secs: u64,
    /// Interval between eviction sweeps.
    pub sweep_interval_secs: u64,
}

/// Admission cost of each operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Cost of start, pause, resume and stop.
    pub command: f64,
    /// Cost of a frame snapshot or status read.
    pub snapshot: f64,
    /// Cost of one code analysis request.
    pub analyze: f64,
}

/// Which device backs the camera session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraSource {
    /// Generated test pattern.
    #[default]
    Synthetic,
    /// JPEG files from a directory, played in a loop.
    Directory,
}

/// Camera configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device source.
    pub source: CameraSource,
    /// Directory of JPEG frames (required for the `directory` source).
    pub directory: Option<PathBuf>,
    /// Capture width in pixels.
    pub width: u32,
    /// Capture height in pixels.
    pub height: u32,
    /// Frames per second while running.
    pub fps: u32,
    /// JPEG quality (1-100) for generated frames.
    pub jpeg_quality: u8,
    /// How long `stop` waits for the capture loop before forcing release.
    pub stop_timeout_ms: u64,
}

/// Which analyzer backs the `/analyze` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisBackend {
    /// Analysis always reports unavailable.
    Disabled,
    /// Local heuristics only, no network.
    #[default]
    Local,
    /// Local heuristics plus a Gemini review.
    Gemini,
}

/// Code analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Analyzer backend.
    pub backend: AnalysisBackend,
    /// Gemini model name.
    pub gemini_model: String,
    /// Gemini API key. Falls back to `GEMINI_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Timeout for a single review request.
    pub timeout_secs: u64,
    /// Upper bound on the length of the review.
    pub max_output_tokens: u32,
    /// Lines longer than this are reported.
    pub long_line_limit: usize,
    /// Largest accepted request body for `/analyze`.
    pub max_source_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
        }
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            capacity: 5.0,
            refill_per_sec: 1.0,
            idle_eviction_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            command: 1.0,
            snapshot: 0.2,
            analyze: 1.0,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: CameraSource::Synthetic,
            directory: None,
            width: 640,
            height: 480,
            fps: 5,
            jpeg_quality: 80,
            stop_timeout_ms: 2_000,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            backend: AnalysisBackend::Local,
            gemini_model: "gemini-1.5-flash".to_string(),
            api_key: None,
            timeout_secs: 20,
            max_output_tokens: 256,
            long_line_limit: 120,
            max_source_bytes: 256 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `CAMDECK_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Config = figment.extract()?;
        if config.analysis.api_key.is_none() {
            config.analysis.api_key = std::env::var(GEMINI_KEY_ENV)
                .ok()
                .filter(|key| !key.trim().is_empty());
        }
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let governor = &self.governor;
        if !(governor.capacity.is_finite() && governor.capacity > 0.0) {
            return Err(Error::config_validation(
                "governor.capacity must be a positive number",
            ));
        }
        if !(governor.refill_per_sec.is_finite() && governor.refill_per_sec > 0.0) {
            return Err(Error::config_validation(
                "governor.refill_per_sec must be a positive number",
            ));
        }
        if governor.sweep_interval_secs == 0 {
            return Err(Error::config_validation(
                "governor.sweep_interval_secs must be greater than 0",
            ));
        }

        for (name, cost) in [
            ("command", self.costs.command),
            ("snapshot", self.costs.snapshot),
            ("analyze", self.costs.analyze),
        ] {
            if !(cost.is_finite() && cost > 0.0) {
                return Err(Error::config_validation(format!(
                    "costs.{name} must be a positive number"
                )));
            }
            // A cost above capacity could never be admitted.
            if cost > governor.capacity {
                return Err(Error::config_validation(format!(
                    "costs.{name} ({cost}) cannot exceed governor.capacity ({})",
                    governor.capacity
                )));
            }
        }

        let camera = &self.camera;
        if camera.fps == 0 || camera.fps > 60 {
            return Err(Error::config_validation(
                "camera.fps must be between 1 and 60",
            ));
        }
        if camera.width == 0 || camera.height == 0 {
            return Err(Error::config_validation(
                "camera.width and camera.height must be greater than 0",
            ));
        }
        if camera.jpeg_quality == 0 || camera.jpeg_quality > 100 {
            return Err(Error::config_validation(
                "camera.jpeg_quality must be between 1 and 100",
            ));
        }
        if camera.stop_timeout_ms == 0 {
            return Err(Error::config_validation(
                "camera.stop_timeout_ms must be greater than 0",
            ));
        }
        if camera.source == CameraSource::Directory && camera.directory.is_none() {
            return Err(Error::config_validation(
                "camera.directory is required when camera.source = \"directory\"",
            ));
        }

        if self.analysis.timeout_secs == 0 {
            return Err(Error::config_validation(
                "analysis.timeout_secs must be greater than 0",
            ));
        }
        if self.analysis.max_source_bytes == 0 {
            return Err(Error::config_validation(
                "analysis.max_source_bytes must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Interval between frames while the camera is running.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.camera.fps.max(1)))
    }

    /// Bound on how long `stop` waits for the capture loop.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.camera.stop_timeout_ms)
    }

    /// Idle time after which a full bucket may be evicted.
    #[must_use]
    pub fn idle_eviction(&self) -> Duration {
        Duration::from_secs(self.governor.idle_eviction_secs)
    }

    /// Interval between bucket sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.governor.sweep_interval_secs)
    }
}

impl AnalysisConfig {
    /// Timeout for a single review request.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
