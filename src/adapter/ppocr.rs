//! Adapter for the native PP-OCR detection + recognition service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{EngineBundle, OcrAdapter, RegionDetector, SettingsUpdate};
use crate::error::{EngineError, EngineResult};
use crate::request::{short_code, RecognitionRequest};
use crate::result::{RawBox, ScalableResult};
use crate::state_machine::EngineStatus;

pub const PPOCR_ADAPTER_NAME: &str = "PpOcrAdapter";

/// Model name inside the engine service.
const SERVICE_ENGINE: &str = "PaddleOCR";

/// Fallback when the configured width is unusable.
const DEFAULT_MAX_IMAGE_WIDTH: u32 = 1600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpOcrSettings {
    /// Wider inputs are downscaled; must be a multiple of 32
    pub max_image_width: u32,
    pub cpu_threads: u32,
    /// `ONNX_CPU` or `Open_VINO`
    pub inference_runtime: String,
    /// Pixels scoring above this count as text
    pub det_db_thresh: f64,
    /// Regions whose mean score exceeds this are kept
    pub det_db_box_thresh: f64,
    pub det_db_unclip_ratio: f64,
    /// `slow` or `fast`
    pub det_db_score_mode: String,
    pub use_dilation: bool,
    /// Confidence needed before a line is flipped 180 degrees
    pub cls_thresh: f64,
}

impl Default for PpOcrSettings {
    fn default() -> Self {
        let cpu_threads = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(4);
        Self {
            max_image_width: DEFAULT_MAX_IMAGE_WIDTH,
            cpu_threads,
            inference_runtime: "ONNX_CPU".to_string(),
            det_db_thresh: 0.3,
            det_db_box_thresh: 0.6,
            det_db_unclip_ratio: 1.6,
            det_db_score_mode: "slow".to_string(),
            use_dilation: false,
            cls_thresh: 0.9,
        }
    }
}

impl PpOcrSettings {
    /// Engine-level parameters only take effect in a fresh process.
    pub fn requires_restart(&self, previous: Option<&PpOcrSettings>) -> bool {
        match previous {
            None => true,
            Some(prev) => {
                prev.cpu_threads != self.cpu_threads
                    || prev.max_image_width != self.max_image_width
                    || prev.inference_runtime != self.inference_runtime
            }
        }
    }

    pub fn validated(mut self) -> Self {
        if self.max_image_width == 0 || self.max_image_width % 32 != 0 {
            warn!(
                max_image_width = self.max_image_width,
                "max_image_width must be a positive multiple of 32, using default"
            );
            self.max_image_width = DEFAULT_MAX_IMAGE_WIDTH;
        }
        self
    }
}

/// English models are shared across regional variants.
fn engine_language_code(code: &str) -> String {
    if short_code(code).eq_ignore_ascii_case("en") {
        "en".to_string()
    } else {
        code.to_string()
    }
}

fn parse_settings(value: serde_json::Value) -> EngineResult<PpOcrSettings> {
    serde_json::from_value(value).map_err(|e| EngineError::InvalidSettings(e.to_string()))
}

pub struct PpOcrAdapter {
    bundle: EngineBundle,
}

impl PpOcrAdapter {
    pub fn new(bundle: EngineBundle) -> Self {
        Self { bundle }
    }

    pub fn bundle(&self) -> &EngineBundle {
        &self.bundle
    }
}

#[async_trait]
impl OcrAdapter for PpOcrAdapter {
    fn name(&self) -> &str {
        PPOCR_ADAPTER_NAME
    }

    fn status(&self) -> EngineStatus {
        self.bundle.status()
    }

    async fn initialize(&self, connection_hint: Option<&str>) -> EngineResult<()> {
        self.bundle.initialize(connection_hint).await
    }

    async fn recognize(&self, mut request: RecognitionRequest) -> Option<ScalableResult> {
        if request.short_language_code().eq_ignore_ascii_case("en") {
            request.language_code = "en".to_string();
        }
        self.bundle.recognize(request, SERVICE_ENGINE, None).await
    }

    async fn get_supported_languages(&self) -> Vec<String> {
        self.bundle
            .bridge()
            .get_supported_languages(SERVICE_ENGINE)
            .await
            .unwrap_or_else(|e| {
                warn!(engine = PPOCR_ADAPTER_NAME, error = %e, "failed to list languages");
                Vec::new()
            })
    }

    fn default_settings(&self) -> serde_json::Value {
        serde_json::to_value(PpOcrSettings::default()).unwrap_or(serde_json::Value::Null)
    }

    async fn update_settings(
        &self,
        update: serde_json::Value,
        previous: Option<serde_json::Value>,
    ) -> EngineResult<SettingsUpdate> {
        let update = parse_settings(update)?;
        let previous = previous.map(parse_settings).transpose()?;
        let requires_restart = update.requires_restart(previous.as_ref());

        let settings = update.validated();
        let value = serde_json::to_value(&settings).map_err(|e| EngineError::Encode(e.to_string()))?;

        if let Err(e) = self.bundle.supervisor().await_ready().await {
            warn!(engine = PPOCR_ADAPTER_NAME, error = %e, "engine not ready for a settings update");
            return Ok(SettingsUpdate {
                settings: value,
                requires_restart: false,
            });
        }

        let mut applied = false;
        for attempt in 1..=2 {
            match self.bundle.bridge().update_engine_settings(&value).await {
                Ok(ack) => {
                    applied = ack;
                    break;
                }
                Err(e) => warn!(engine = PPOCR_ADAPTER_NAME, attempt, error = %e, "settings update failed"),
            }
        }
        if !applied {
            warn!(engine = PPOCR_ADAPTER_NAME, "engine did not acknowledge settings");
        }

        self.bundle.clear_cache();
        Ok(SettingsUpdate {
            settings: value,
            requires_restart,
        })
    }

    async fn restart(&self) -> bool {
        self.bundle.restart().await
    }

    async fn shutdown(&self) {
        self.bundle.shutdown().await;
    }
}

#[async_trait]
impl RegionDetector for PpOcrAdapter {
    async fn detect_regions(&self, image: &[u8], language_code: &str) -> EngineResult<Vec<RawBox>> {
        self.bundle.supervisor().await_ready().await?;
        self.bundle
            .bridge()
            .detect_regions(image, &engine_language_code(language_code))
            .await
    }
}
