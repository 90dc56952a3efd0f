//! Adapter for the interpreted manga OCR service.
//!
//! The service only recognizes pre-cropped text. Boxes come either from the
//! native engine's detector or from the service's own comic text detector.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{EngineBundle, OcrAdapter, RegionDetector, SettingsUpdate};
use crate::error::{EngineError, EngineResult};
use crate::request::RecognitionRequest;
use crate::result::ScalableResult;
use crate::rpc::messages::{HardwareAccelerationOption, TextRecognitionModel};
use crate::state_machine::EngineStatus;

pub const MANGA_OCR_ADAPTER_NAME: &str = "MangaOcrAdapter";

const SERVICE_ENGINE: &str = "MangaOCR";

const LANGUAGE: &str = "ja";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextDetector {
    /// Boxes from the native engine's `DetectRegions`
    #[default]
    PaddleTextDetector,
    /// Detection inside the manga service itself
    ComicTextDetector,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MangaOcrSettings {
    pub text_detector: TextDetector,
}

/// Full-width ellipsis runs read better as a single glyph.
fn post_process(result: ScalableResult) -> ScalableResult {
    result.map_text(|text| text.replace("．．．", "…"))
}

pub struct MangaOcrAdapter {
    bundle: EngineBundle,
    detector: Option<Arc<dyn RegionDetector>>,
    settings: RwLock<MangaOcrSettings>,
}

impl MangaOcrAdapter {
    pub fn new(bundle: EngineBundle, detector: Option<Arc<dyn RegionDetector>>) -> Self {
        Self {
            bundle,
            detector,
            settings: RwLock::new(MangaOcrSettings::default()),
        }
    }

    pub fn bundle(&self) -> &EngineBundle {
        &self.bundle
    }

    pub fn settings(&self) -> MangaOcrSettings {
        self.settings.read().clone()
    }

    fn active_detector(&self) -> Option<&dyn RegionDetector> {
        match self.settings.read().text_detector {
            TextDetector::PaddleTextDetector => self.detector.as_deref(),
            TextDetector::ComicTextDetector => None,
        }
    }
}

#[async_trait]
impl OcrAdapter for MangaOcrAdapter {
    fn name(&self) -> &str {
        MANGA_OCR_ADAPTER_NAME
    }

    fn status(&self) -> EngineStatus {
        self.bundle.status()
    }

    async fn initialize(&self, connection_hint: Option<&str>) -> EngineResult<()> {
        self.bundle.initialize(connection_hint).await
    }

    async fn recognize(&self, mut request: RecognitionRequest) -> Option<ScalableResult> {
        request.language_code = LANGUAGE.to_string();
        let detector = self.active_detector();
        if detector.is_none() {
            debug!(engine = MANGA_OCR_ADAPTER_NAME, "using the service's own text detector");
        }
        self.bundle
            .recognize(request, SERVICE_ENGINE, detector)
            .await
            .map(post_process)
    }

    async fn get_supported_languages(&self) -> Vec<String> {
        vec!["ja-JP".to_string()]
    }

    async fn get_supported_models(&self) -> Vec<TextRecognitionModel> {
        self.bundle
            .bridge()
            .get_supported_models(SERVICE_ENGINE)
            .await
            .unwrap_or_else(|e| {
                warn!(engine = MANGA_OCR_ADAPTER_NAME, error = %e, "failed to list models");
                Vec::new()
            })
    }

    async fn install_model(&self, model_name: &str) -> bool {
        match self.bundle.bridge().install_model(SERVICE_ENGINE, model_name).await {
            Ok(installed) => installed,
            Err(e) => {
                warn!(engine = MANGA_OCR_ADAPTER_NAME, model = model_name, error = %e, "model install failed");
                false
            }
        }
    }

    async fn get_hardware_acceleration_options(&self) -> Vec<HardwareAccelerationOption> {
        self.bundle
            .bridge()
            .get_hardware_acceleration_options(SERVICE_ENGINE)
            .await
            .unwrap_or_else(|e| {
                warn!(engine = MANGA_OCR_ADAPTER_NAME, error = %e, "failed to list hardware acceleration options");
                Vec::new()
            })
    }

    fn default_settings(&self) -> serde_json::Value {
        serde_json::to_value(MangaOcrSettings::default()).unwrap_or(serde_json::Value::Null)
    }

    async fn update_settings(
        &self,
        update: serde_json::Value,
        _previous: Option<serde_json::Value>,
    ) -> EngineResult<SettingsUpdate> {
        let settings: MangaOcrSettings =
            serde_json::from_value(update).map_err(|e| EngineError::InvalidSettings(e.to_string()))?;
        let value = serde_json::to_value(&settings).map_err(|e| EngineError::Encode(e.to_string()))?;
        *self.settings.write() = settings;
        self.bundle.clear_cache();
        Ok(SettingsUpdate {
            settings: value,
            requires_restart: false,
        })
    }

    async fn restart(&self) -> bool {
        self.bundle.restart().await
    }

    async fn shutdown(&self) {
        self.bundle.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ppocr::tests::{adapter_with as ppocr_with, recognize_reply};
    use crate::config::{CacheConfig, EngineConfig, NormalizerConfig};
    use crate::rpc::bridge::tests::FakeTransport;
    use crate::rpc::{RpcMethod, Transport, TransportFactory};
    use serde_json::json;
    use std::path::PathBuf;

    fn manga_reply() -> serde_json::Value {
        json!({
            "id": "m",
            "context_resolution": {"width": 1000, "height": 1000},
            "results": [{
                "text": [{"content": "そうか．．．"}],
                "box": {
                    "top_left": {"x": 800, "y": 100}, "top_right": {"x": 850, "y": 100},
                    "bottom_right": {"x": 850, "y": 500}, "bottom_left": {"x": 800, "y": 500}
                }
            }]
        })
    }

    fn detect_reply() -> serde_json::Value {
        json!({
            "context_resolution": {"width": 1000, "height": 1000},
            "results": [{"box": {
                "top_left": {"x": 800, "y": 100}, "top_right": {"x": 850, "y": 100},
                "bottom_right": {"x": 850, "y": 500}, "bottom_left": {"x": 800, "y": 500}
            }}]
        })
    }

    fn manga_with(transport: Arc<FakeTransport>, detector: Option<Arc<dyn RegionDetector>>) -> MangaOcrAdapter {
        let factory: TransportFactory = Arc::new(move |_: &str| Ok(transport.clone() as Arc<dyn Transport>));
        let engine = EngineConfig {
            executable: PathBuf::from("/nonexistent/python"),
            max_retries: 0,
            status_poll_interval_ms: 10,
            status_poll_max_tries: 10,
            keep_alive_secs: None,
            ..EngineConfig::interpreted()
        };
        let bundle = EngineBundle::new(
            MANGA_OCR_ADAPTER_NAME,
            engine,
            &CacheConfig::default(),
            NormalizerConfig::default(),
            factory,
        );
        MangaOcrAdapter::new(bundle, detector)
    }

    #[tokio::test]
    async fn test_ellipsis_rewritten_and_language_forced() {
        let transport = FakeTransport::new(|_, _| Ok(manga_reply()));
        let adapter = manga_with(transport.clone(), None);
        adapter.initialize(Some("127.0.0.1:1")).await.unwrap();

        let result = adapter
            .recognize(RecognitionRequest::new(vec![1, 2, 3], "en-US"))
            .await
            .unwrap();
        let item = result.items().next().unwrap();
        assert_eq!(item.text[0].content, "そうか…");
        assert!(item.bounds.is_vertical);
        assert_eq!(result.language, "ja");

        let calls = transport.calls.lock();
        assert_eq!(calls[0].1["language_code"], "ja");
        assert_eq!(calls[0].1["ocr_engine"], "MangaOCR");
    }

    #[tokio::test]
    async fn test_native_detector_supplies_boxes() {
        let paddle_transport = FakeTransport::new(|method, _| match method {
            RpcMethod::DetectRegions => Ok(detect_reply()),
            _ => Ok(recognize_reply()),
        });
        let paddle = Arc::new(ppocr_with(paddle_transport.clone()));
        paddle.initialize(Some("127.0.0.1:1")).await.unwrap();

        let manga_transport = FakeTransport::new(|_, _| Ok(manga_reply()));
        let adapter = manga_with(manga_transport.clone(), Some(paddle as Arc<dyn RegionDetector>));
        adapter.initialize(Some("127.0.0.1:1")).await.unwrap();

        assert!(adapter.recognize(RecognitionRequest::new(vec![4], "ja")).await.is_some());
        assert_eq!(paddle_transport.count(RpcMethod::DetectRegions), 1);

        let calls = manga_transport.calls.lock();
        let boxes = calls[0].1["boxes"].as_array().unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0]["top_left"]["x"], 800.0);
    }

    #[tokio::test]
    async fn test_comic_detector_skips_native_detection() {
        let paddle_transport = FakeTransport::new(|_, _| Ok(detect_reply()));
        let paddle = Arc::new(ppocr_with(paddle_transport.clone()));
        paddle.initialize(Some("127.0.0.1:1")).await.unwrap();

        let manga_transport = FakeTransport::new(|_, _| Ok(manga_reply()));
        let adapter = manga_with(manga_transport.clone(), Some(paddle as Arc<dyn RegionDetector>));
        adapter.initialize(Some("127.0.0.1:1")).await.unwrap();

        let outcome = adapter
            .update_settings(json!({"text_detector": "comic_text_detector"}), None)
            .await
            .unwrap();
        assert!(!outcome.requires_restart);
        assert_eq!(adapter.settings().text_detector, TextDetector::ComicTextDetector);

        assert!(adapter.recognize(RecognitionRequest::new(vec![5], "ja")).await.is_some());
        assert_eq!(paddle_transport.count(RpcMethod::DetectRegions), 0);
        assert!(manga_transport.calls.lock()[0].1.get("boxes").is_none());
    }

    #[tokio::test]
    async fn test_settings_update_clears_cache() {
        let transport = FakeTransport::new(|_, _| Ok(manga_reply()));
        let adapter = manga_with(transport.clone(), None);
        adapter.initialize(Some("127.0.0.1:1")).await.unwrap();

        adapter.recognize(RecognitionRequest::new(vec![6], "ja")).await;
        adapter.recognize(RecognitionRequest::new(vec![6], "ja")).await;
        assert_eq!(transport.count(RpcMethod::Recognize), 1);

        adapter.update_settings(adapter.default_settings(), None).await.unwrap();
        adapter.recognize(RecognitionRequest::new(vec![6], "ja")).await;
        assert_eq!(transport.count(RpcMethod::Recognize), 2);
    }

    #[tokio::test]
    async fn test_supported_languages_are_fixed() {
        let transport = FakeTransport::new(|_, _| Ok(json!({})));
        let adapter = manga_with(transport.clone(), None);
        assert_eq!(adapter.get_supported_languages().await, vec!["ja-JP".to_string()]);
        assert!(transport.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_models_listed_through_service() {
        let transport = FakeTransport::new(|method, _| match method {
            RpcMethod::GetSupportedModels => Ok(json!({
                "models": [{"name": "manga-ocr-base", "language_codes": ["ja"], "is_installed": true}]
            })),
            _ => Ok(json!({})),
        });
        let adapter = manga_with(transport, None);
        adapter.initialize(Some("127.0.0.1:1")).await.unwrap();

        let models = adapter.get_supported_models().await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "manga-ocr-base");
    }
}
