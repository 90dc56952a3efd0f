//! Orchestrator configuration.
//!
//! Per-engine process settings plus cache and normalizer tuning, stored as TOML.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Placeholder in [`EngineConfig::args`] replaced by the allocated port.
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Smallest keep-alive interval an engine accepts.
pub const MIN_KEEP_ALIVE_SECS: u64 = 15;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Native detection/recognition engine
    pub ppocr: EngineConfig,
    /// Interpreted-runtime engine specialised for Japanese manga text
    pub manga_ocr: EngineConfig,
    pub cache: CacheConfig,
    pub normalizer: NormalizerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ppocr: EngineConfig::native(),
            manga_ocr: EngineConfig::interpreted(),
            cache: CacheConfig::default(),
            normalizer: NormalizerConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Reject values the supervisor cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        self.ppocr.validate("ppocr")?;
        self.manga_ocr.validate("manga_ocr")?;
        if self.normalizer.vertical_aspect_ratio <= 0.0 {
            return Err(ConfigError::Invalid(
                "normalizer.vertical_aspect_ratio must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// How to launch and supervise one engine process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Whether the registry builds this engine at all
    pub enabled: bool,
    /// Program to execute
    pub executable: PathBuf,
    /// Arguments; `{port}` is substituted with the allocated port
    pub args: Vec<String>,
    /// Working directory for the child process
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// Port used when the search range has no free port
    pub default_port: u16,
    pub port_search_start: u16,
    pub port_search_end: u16,
    /// Consecutive unexpected exits tolerated before the engine is disabled
    pub max_retries: u32,
    pub status_poll_interval_ms: u64,
    pub status_poll_max_tries: u32,
    /// Heartbeat interval; `None` disables the heartbeat
    pub keep_alive_secs: Option<u64>,
    /// Time between the polite and the forced termination signal
    pub shutdown_grace_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::native()
    }
}

impl EngineConfig {
    /// Defaults for a compiled engine binary.
    pub fn native() -> Self {
        Self {
            enabled: true,
            executable: PathBuf::from("bin/ppocr/start.sh"),
            args: vec!["presets".to_string()],
            working_dir: Some(PathBuf::from("bin/ppocr")),
            env: BTreeMap::new(),
            default_port: 23456,
            port_search_start: 23456,
            port_search_end: u16::MAX,
            max_retries: 5,
            status_poll_interval_ms: 2000,
            status_poll_max_tries: 5,
            keep_alive_secs: None,
            shutdown_grace_ms: 1500,
            request_timeout_ms: 30_000,
        }
    }

    /// Defaults for an engine hosted by an interpreter, which boots slower
    /// and shuts itself down unless it hears a heartbeat.
    pub fn interpreted() -> Self {
        let mut env = BTreeMap::new();
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        Self {
            enabled: true,
            executable: PathBuf::from("bin/py_ocr_service/python/python"),
            args: vec![
                "-u".to_string(),
                "py_ocr_service.py".to_string(),
                PORT_PLACEHOLDER.to_string(),
            ],
            working_dir: Some(PathBuf::from("bin/py_ocr_service/src")),
            env,
            default_port: 32346,
            port_search_start: 53000,
            port_search_end: u16::MAX,
            max_retries: 5,
            status_poll_interval_ms: 2000,
            status_poll_max_tries: 15,
            keep_alive_secs: Some(MIN_KEEP_ALIVE_SECS),
            shutdown_grace_ms: 3000,
            request_timeout_ms: 60_000,
        }
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Heartbeat interval, clamped to the engine minimum.
    pub fn keep_alive_interval(&self) -> Option<Duration> {
        self.keep_alive_secs
            .map(|secs| Duration::from_secs(secs.max(MIN_KEEP_ALIVE_SECS)))
    }

    /// Arguments with the port placeholder filled in.
    pub fn render_args(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
            .collect()
    }

    fn validate(&self, section: &str) -> ConfigResult<()> {
        if self.port_search_start > self.port_search_end {
            return Err(ConfigError::Invalid(format!(
                "{section}: port_search_start ({}) is above port_search_end ({})",
                self.port_search_start, self.port_search_end
            )));
        }
        if self.status_poll_max_tries == 0 {
            return Err(ConfigError::Invalid(format!(
                "{section}: status_poll_max_tries must be at least 1"
            )));
        }
        if self.enabled && self.executable.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{section}: executable is empty"
            )));
        }
        Ok(())
    }
}

/// Result cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds a cached result stays valid
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 30 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Result normalizer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// A box is vertical when height exceeds width times this ratio
    pub vertical_aspect_ratio: f64,
    /// ...and its text has more characters than this
    pub vertical_min_chars: usize,
    /// Boxes tilted beyond this many degrees are vertical regardless of shape
    pub steep_angle_degrees: Option<f64>,
    /// Re-sort lines and words into reading order
    pub reorder_lines: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            vertical_aspect_ratio: 1.2,
            vertical_min_chars: 1,
            steep_angle_degrees: Some(70.0),
            reorder_lines: true,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> ConfigResult<OrchestratorConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: OrchestratorConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &OrchestratorConfig, path: &Path) -> ConfigResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Default location of the configuration file.
pub fn default_config_path() -> ConfigResult<PathBuf> {
    let dirs = directories::ProjectDirs::from("dev", "ocr-orchestrator", "OcrOrchestrator")
        .ok_or(ConfigError::NoConfigDir)?;
    Ok(dirs.config_dir().join("config.toml"))
}
