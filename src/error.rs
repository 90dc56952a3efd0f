//! Error types for engine supervision, RPC and configuration.

use std::path::PathBuf;

use thiserror::Error;

use crate::state_machine::EngineStatus;

/// Errors raised while supervising or talking to an OCR engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is not connected")]
    NotConnected,

    #[error("engine is disabled")]
    Disabled,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid handshake: {0}")]
    Handshake(String),

    #[error("engine exited before becoming ready (code {0:?})")]
    PrematureExit(Option<i32>),

    #[error("engine not ready after {tries} status polls")]
    NotReady { tries: u32 },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: EngineStatus, to: EngineStatus },

    #[error("malformed engine response: {0}")]
    MalformedResponse(String),

    #[error("failed to encode request: {0}")]
    Encode(String),

    #[error("invalid engine settings: {0}")]
    InvalidSettings(String),
}

impl EngineError {
    /// Whether the error means the connection itself is broken and the
    /// engine process should be restarted.
    pub fn is_transport(&self) -> bool {
        matches!(self, EngineError::Transport(_))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Transport(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while loading, validating or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("could not determine the configuration directory")]
    NoConfigDir,
}

pub type ConfigResult<T> = Result<T, ConfigError>;
