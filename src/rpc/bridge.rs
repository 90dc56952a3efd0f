//! Typed client for the engine RPC surface.
//!
//! Calls go through whatever connection the supervisor currently holds. A
//! transport-level failure asks the supervisor to restart the engine and is
//! still returned to the caller.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::messages::{
    encode_image, DetectRequest, DetectResponse, EngineQuery, HardwareAccelerationOption,
    HardwareAccelerationResponse, InstallModelRequest, KeepAliveRequest, MotionDetectionRequest,
    MotionDetectionResponse, RecognizeRequest, RecognizeResponse, SuccessResponse,
    SupportedLanguagesResponse, SupportedModelsResponse, TextRecognitionModel,
};
use super::RpcMethod;
use crate::engine::EngineSupervisor;
use crate::error::{EngineError, EngineResult};
use crate::metrics::metric_names;
use crate::request::RecognitionRequest;
use crate::result::{RawBox, RawOcrResult};

/// Seconds beyond the heartbeat interval the engine should stay alive for.
const KEEP_ALIVE_SLACK_SECS: u64 = 10;

pub struct RpcBridge {
    supervisor: Arc<EngineSupervisor>,
}

impl RpcBridge {
    pub fn new(supervisor: Arc<EngineSupervisor>) -> Self {
        Self { supervisor }
    }

    pub fn supervisor(&self) -> &Arc<EngineSupervisor> {
        &self.supervisor
    }

    async fn invoke<Req, Resp>(&self, method: RpcMethod, request: &Req) -> EngineResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let (generation, transport) = self
            .supervisor
            .connection_with_generation()
            .ok_or(EngineError::NotConnected)?;
        let payload = serde_json::to_value(request).map_err(|e| EngineError::Encode(e.to_string()))?;

        match transport.call(method, payload).await {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| EngineError::MalformedResponse(format!("{method}: {e}"))),
            Err(e) => {
                if e.is_transport() {
                    warn!(engine = %self.supervisor.name(), %method, error = %e, "engine rpc failed");
                    self.supervisor.report_transport_failure(generation);
                } else {
                    debug!(engine = %self.supervisor.name(), %method, error = %e, "engine rpc error");
                }
                Err(e)
            }
        }
    }

    /// Recognize text. `Ok(None)` when the engine answered without a resolution or results.
    pub async fn recognize(
        &self,
        request: &RecognitionRequest,
        ocr_engine: &str,
    ) -> EngineResult<Option<RawOcrResult>> {
        let message = RecognizeRequest {
            id: &request.id,
            base64_image: encode_image(&request.image),
            language_code: &request.language_code,
            ocr_engine,
            boxes: request.boxes.clone().unwrap_or_default(),
        };
        let span = self.supervisor.metrics().span(metric_names::RPC_RECOGNIZE);
        let response: RecognizeResponse = self.invoke(RpcMethod::Recognize, &message).await?;
        span.finish();

        let raw = response.into_raw();
        if raw.is_none() {
            warn!(engine = %self.supervisor.name(), id = %request.id, "recognize response missing resolution or results");
        }
        Ok(raw)
    }

    /// Text regions without recognition.
    pub async fn detect_regions(&self, image: &[u8], language_code: &str) -> EngineResult<Vec<RawBox>> {
        let id = uuid::Uuid::new_v4().to_string();
        let message = DetectRequest {
            id: &id,
            base64_image: encode_image(image),
            language_code,
        };
        let response: DetectResponse = self.invoke(RpcMethod::DetectRegions, &message).await?;
        Ok(response.results.into_iter().filter_map(|r| r.quad).collect())
    }

    pub async fn get_supported_languages(&self, ocr_engine: &str) -> EngineResult<Vec<String>> {
        let response: SupportedLanguagesResponse = self
            .invoke(RpcMethod::GetSupportedLanguages, &EngineQuery { ocr_engine })
            .await?;
        Ok(response.language_codes)
    }

    pub async fn get_supported_models(&self, ocr_engine: &str) -> EngineResult<Vec<TextRecognitionModel>> {
        let response: SupportedModelsResponse = self
            .invoke(RpcMethod::GetSupportedModels, &EngineQuery { ocr_engine })
            .await?;
        Ok(response.models)
    }

    pub async fn install_model(&self, ocr_engine: &str, model_name: &str) -> EngineResult<bool> {
        let response: SuccessResponse = self
            .invoke(
                RpcMethod::InstallModel,
                &InstallModelRequest {
                    ocr_engine,
                    model_name,
                },
            )
            .await?;
        Ok(response.success)
    }

    /// Push engine-specific settings. Returns the engine's acknowledgement.
    pub async fn update_engine_settings(&self, settings: &serde_json::Value) -> EngineResult<bool> {
        let response: SuccessResponse = self.invoke(RpcMethod::UpdateSettings, settings).await?;
        Ok(response.success)
    }

    pub async fn get_hardware_acceleration_options(
        &self,
        ocr_engine: &str,
    ) -> EngineResult<Vec<HardwareAccelerationOption>> {
        let response: HardwareAccelerationResponse = self
            .invoke(RpcMethod::GetHardwareAccelerationOptions, &EngineQuery { ocr_engine })
            .await?;
        Ok(response.hardware_acceleration_options)
    }

    /// Tell the engine to stay alive for another `timeout_seconds`.
    pub async fn keep_alive(&self, timeout_seconds: u64) -> EngineResult<()> {
        let _: serde::de::IgnoredAny = self
            .invoke(
                RpcMethod::KeepAlive,
                &KeepAliveRequest {
                    keep_alive: true,
                    timeout_seconds,
                },
            )
            .await?;
        Ok(())
    }

    /// Sum of pixel differences against the previous frame of `stream_id`.
    pub async fn motion_detection(&self, stream_id: &str, frame: &[u8], frame_sample_size: u32) -> EngineResult<f64> {
        let response: MotionDetectionResponse = self
            .invoke(
                RpcMethod::MotionDetection,
                &MotionDetectionRequest {
                    stream_id,
                    base64_frame: encode_image(frame),
                    frame_sample_size,
                },
            )
            .await?;
        Ok(response.frame_diff_sum)
    }

    /// Send a heartbeat every `interval` while the engine is ready, until `stop` fires.
    pub fn spawn_keep_alive(self: &Arc<Self>, interval: Duration, stop: CancellationToken) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        let timeout_seconds = interval.as_secs() + KEEP_ALIVE_SLACK_SECS;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        if !bridge.supervisor.status().is_ready() {
                            continue;
                        }
                        if let Err(e) = bridge.keep_alive(timeout_seconds).await {
                            warn!(engine = %bridge.supervisor.name(), error = %e, "keep-alive failed");
                        }
                    }
                }
            }
            debug!(engine = %bridge.supervisor.name(), "keep-alive stopped");
        })
    }
}
