//! OCR engine orchestration: launches out-of-process OCR engines, keeps them
//! alive, gates recognition traffic and normalizes results into
//! resolution-independent boxes.

pub mod adapter;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod metrics;
pub mod request;
pub mod result;
pub mod rpc;
pub mod state_machine;

pub use adapter::{EngineRegistry, OcrAdapter, RegionDetector, SettingsUpdate};
pub use config::OrchestratorConfig;
pub use error::{ConfigError, EngineError, EngineResult};
pub use request::RecognitionRequest;
pub use result::{Normalizer, RawOcrResult, ScalableResult};
pub use state_machine::EngineStatus;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ocr_orchestrator=debug,info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);
    // Ignore the error when a subscriber is already installed (tests, embedding apps).
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
