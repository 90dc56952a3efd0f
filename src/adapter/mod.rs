//! Uniform facade over the individual OCR engines.
//!
//! Nothing here returns transport or process errors to the caller: failed
//! recognitions come back as `None` and failed queries as empty lists, with
//! the cause logged.

pub mod bundle;
pub mod manga_ocr;
pub mod ppocr;
pub mod registry;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::EngineResult;
use crate::request::RecognitionRequest;
use crate::result::{RawBox, ScalableResult};
use crate::rpc::messages::{HardwareAccelerationOption, TextRecognitionModel};
use crate::state_machine::EngineStatus;

pub use bundle::EngineBundle;
pub use manga_ocr::MangaOcrAdapter;
pub use ppocr::PpOcrAdapter;
pub use registry::EngineRegistry;

/// Outcome of a settings update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsUpdate {
    /// Settings as the engine now holds them
    pub settings: serde_json::Value,
    /// The new values only take effect after a restart
    pub requires_restart: bool,
}

#[async_trait]
pub trait OcrAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn status(&self) -> EngineStatus;

    /// Launch the engine, or attach to one already listening at `connection_hint`.
    async fn initialize(&self, connection_hint: Option<&str>) -> EngineResult<()>;

    async fn recognize(&self, request: RecognitionRequest) -> Option<ScalableResult>;

    async fn get_supported_languages(&self) -> Vec<String>;

    async fn get_supported_models(&self) -> Vec<TextRecognitionModel> {
        Vec::new()
    }

    async fn install_model(&self, _model_name: &str) -> bool {
        false
    }

    async fn get_hardware_acceleration_options(&self) -> Vec<HardwareAccelerationOption> {
        Vec::new()
    }

    fn default_settings(&self) -> serde_json::Value;

    /// Apply `update`; `previous` decides whether a restart is needed.
    /// Only malformed settings are reported as errors.
    async fn update_settings(
        &self,
        update: serde_json::Value,
        previous: Option<serde_json::Value>,
    ) -> EngineResult<SettingsUpdate>;

    /// Resolves once the restarted engine is ready, or the wait gave up.
    async fn restart(&self) -> bool;

    async fn shutdown(&self);
}

/// Finds text regions for engines that only recognize pre-cropped boxes.
#[async_trait]
pub trait RegionDetector: Send + Sync {
    async fn detect_regions(&self, image: &[u8], language_code: &str) -> EngineResult<Vec<RawBox>>;
}
