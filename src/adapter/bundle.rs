//! Per-engine plumbing shared by every adapter: supervisor, bridge, gate,
//! cache and normalizer wired together.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::RegionDetector;
use crate::cache::ResultCache;
use crate::config::{CacheConfig, EngineConfig, NormalizerConfig};
use crate::engine::EngineSupervisor;
use crate::error::EngineResult;
use crate::gate::{GateOutcome, ReadinessPolicy, RecognitionGate};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::request::RecognitionRequest;
use crate::result::{Normalizer, ScalableResult};
use crate::rpc::{RpcBridge, TransportFactory};
use crate::state_machine::EngineStatus;

pub struct EngineBundle {
    adapter_name: String,
    supervisor: Arc<EngineSupervisor>,
    bridge: Arc<RpcBridge>,
    gate: RecognitionGate<RecognitionRequest>,
    cache: ResultCache,
    normalizer: Normalizer,
    metrics: Arc<MetricsRegistry>,
    keep_alive: Mutex<Option<CancellationToken>>,
}

impl EngineBundle {
    pub fn new(
        adapter_name: &str,
        engine: EngineConfig,
        cache: &CacheConfig,
        normalizer: NormalizerConfig,
        transport_factory: TransportFactory,
    ) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let supervisor = EngineSupervisor::new(adapter_name, engine, Arc::clone(&metrics), transport_factory);
        let gate = RecognitionGate::new(Arc::clone(supervisor.state()), Arc::clone(&metrics));
        Self {
            adapter_name: adapter_name.to_string(),
            bridge: Arc::new(RpcBridge::new(Arc::clone(&supervisor))),
            supervisor,
            gate,
            cache: ResultCache::new(cache.ttl()),
            normalizer: Normalizer::new(normalizer),
            metrics,
            keep_alive: Mutex::new(None),
        }
    }

    pub fn bridge(&self) -> &Arc<RpcBridge> {
        &self.bridge
    }

    pub fn supervisor(&self) -> &Arc<EngineSupervisor> {
        &self.supervisor
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn status(&self) -> EngineStatus {
        self.supervisor.status()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn readiness(&self) -> ReadinessPolicy {
        let config = self.supervisor.config();
        ReadinessPolicy {
            poll_interval: config.status_poll_interval(),
            max_tries: config.status_poll_max_tries,
        }
    }

    /// Connect to `connection_hint` if given, otherwise launch the engine.
    pub async fn initialize(&self, connection_hint: Option<&str>) -> EngineResult<()> {
        match connection_hint {
            Some(address) => self.supervisor.connect(address)?,
            None => self.supervisor.start().await?,
        }
        self.start_keep_alive();
        info!(engine = %self.adapter_name, "engine initialized");
        Ok(())
    }

    fn start_keep_alive(&self) {
        let Some(interval) = self.supervisor.config().keep_alive_interval() else {
            return;
        };
        let mut slot = self.keep_alive.lock();
        if slot.is_some() {
            return;
        }
        let stop = CancellationToken::new();
        self.bridge.spawn_keep_alive(interval, stop.clone());
        *slot = Some(stop);
    }

    /// Gate, consult the cache, call the engine and normalize.
    ///
    /// `ocr_engine` names the model inside a multi-model engine service.
    /// Transport failures and malformed responses yield `None`.
    pub async fn recognize(
        &self,
        request: RecognitionRequest,
        ocr_engine: &str,
        detector: Option<&dyn RegionDetector>,
    ) -> Option<ScalableResult> {
        let total = self.metrics.span(metric_names::RECOGNIZE_TOTAL);
        let outcome = self
            .gate
            .run(request, self.readiness(), |request| self.dispatch(request, ocr_engine, detector))
            .await;
        total.finish();

        match outcome {
            GateOutcome::Completed(result) => result,
            GateOutcome::Held | GateOutcome::Superseded => None,
            GateOutcome::Rejected(status) => {
                debug!(engine = %self.adapter_name, %status, "recognition rejected");
                None
            }
        }
    }

    async fn dispatch(
        &self,
        mut request: RecognitionRequest,
        ocr_engine: &str,
        detector: Option<&dyn RegionDetector>,
    ) -> Option<ScalableResult> {
        if let Some(cached) = self.cache.get(&request.image) {
            self.metrics.increment(metric_names::CACHE_HITS);
            debug!(engine = %self.adapter_name, id = %request.id, "cache hit");
            return cached;
        }
        self.metrics.increment(metric_names::CACHE_MISSES);

        if let (None, Some(detector)) = (&request.boxes, detector) {
            match detector.detect_regions(&request.image, &request.language_code).await {
                Ok(boxes) => request.boxes = Some(boxes),
                Err(e) => warn!(engine = %self.adapter_name, error = %e, "text detection failed"),
            }
        }

        let result = match self.bridge.recognize(&request, ocr_engine).await {
            Ok(Some(raw)) => {
                let span = self.metrics.span(metric_names::NORMALIZE);
                let normalized = self
                    .normalizer
                    .normalize_result(&raw, &self.adapter_name, &request.language_code);
                span.finish();
                Some(normalized)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(engine = %self.adapter_name, id = %request.id, error = %e, "recognition failed");
                None
            }
        };
        self.cache.insert(&request.image, result.clone());
        result
    }

    pub async fn restart(&self) -> bool {
        match self.supervisor.restart().await {
            Ok(()) => true,
            Err(e) => {
                warn!(engine = %self.adapter_name, error = %e, "restart did not complete");
                false
            }
        }
    }

    pub async fn shutdown(&self) {
        if let Some(stop) = self.keep_alive.lock().take() {
            stop.cancel();
        }
        self.supervisor.shutdown().await;
        info!(
            engine = %self.adapter_name,
            counters = ?self.metrics.counters(),
            latencies = ?self.metrics.summary(),
            "engine metrics"
        );
    }
}
