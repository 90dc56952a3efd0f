//! Builds the enabled adapters from configuration and owns them for the
//! lifetime of the process.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{info, warn};

use super::bundle::EngineBundle;
use super::manga_ocr::{MangaOcrAdapter, MANGA_OCR_ADAPTER_NAME};
use super::ppocr::{PpOcrAdapter, PPOCR_ADAPTER_NAME};
use super::{OcrAdapter, RegionDetector};
use crate::config::{EngineConfig, OrchestratorConfig};
use crate::error::EngineResult;
use crate::rpc::{http_transport_factory, TransportFactory};

const ALIASES: &[(&str, &str)] = &[
    ("ppocr", PPOCR_ADAPTER_NAME),
    ("paddle", PPOCR_ADAPTER_NAME),
    ("paddleocr", PPOCR_ADAPTER_NAME),
    ("manga-ocr", MANGA_OCR_ADAPTER_NAME),
    ("manga_ocr", MANGA_OCR_ADAPTER_NAME),
    ("mangaocr", MANGA_OCR_ADAPTER_NAME),
];

pub struct EngineRegistry {
    adapters: Vec<Arc<dyn OcrAdapter>>,
}

impl EngineRegistry {
    /// Adapters talking HTTP with each engine's configured request timeout.
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self::with_transports(config, |engine| http_transport_factory(engine.request_timeout()))
    }

    /// Build with a caller-supplied transport per engine.
    pub fn with_transports(
        config: &OrchestratorConfig,
        transport_for: impl Fn(&EngineConfig) -> TransportFactory,
    ) -> Self {
        let mut adapters: Vec<Arc<dyn OcrAdapter>> = Vec::new();

        let ppocr = config.ppocr.enabled.then(|| {
            let bundle = EngineBundle::new(
                PPOCR_ADAPTER_NAME,
                config.ppocr.clone(),
                &config.cache,
                config.normalizer.clone(),
                transport_for(&config.ppocr),
            );
            Arc::new(PpOcrAdapter::new(bundle))
        });
        if let Some(ppocr) = &ppocr {
            adapters.push(Arc::clone(ppocr) as Arc<dyn OcrAdapter>);
        }

        if config.manga_ocr.enabled {
            let bundle = EngineBundle::new(
                MANGA_OCR_ADAPTER_NAME,
                config.manga_ocr.clone(),
                &config.cache,
                config.normalizer.clone(),
                transport_for(&config.manga_ocr),
            );
            let detector = ppocr.map(|p| p as Arc<dyn RegionDetector>);
            if detector.is_none() {
                warn!("PP-OCR disabled, manga OCR falls back to its own text detector");
            }
            adapters.push(Arc::new(MangaOcrAdapter::new(bundle, detector)));
        }

        Self { adapters }
    }

    pub fn adapters(&self) -> &[Arc<dyn OcrAdapter>] {
        &self.adapters
    }

    /// Look up by adapter name or short alias, ignoring case.
    pub fn get(&self, name: &str) -> Option<Arc<dyn OcrAdapter>> {
        let wanted = ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
            .map_or(name, |(_, full)| *full);
        self.adapters
            .iter()
            .find(|a| a.name().eq_ignore_ascii_case(wanted))
            .cloned()
    }

    /// Launch every engine concurrently. One engine failing does not stop the others.
    pub async fn initialize_all(&self) -> Vec<(String, EngineResult<()>)> {
        join_all(self.adapters.iter().map(|adapter| async move {
            let outcome = adapter.initialize(None).await;
            match &outcome {
                Ok(()) => info!(engine = %adapter.name(), "engine ready"),
                Err(e) => warn!(engine = %adapter.name(), error = %e, "engine failed to start"),
            }
            (adapter.name().to_string(), outcome)
        }))
        .await
    }

    pub async fn shutdown_all(&self) {
        join_all(self.adapters.iter().map(|a| a.shutdown())).await;
    }
}
