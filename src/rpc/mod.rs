//! Engine RPC surface.
//! Requests and responses are JSON documents; how they travel is up to the [`Transport`].

pub mod bridge;
pub mod http;
pub mod messages;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineResult;

pub use bridge::RpcBridge;
pub use http::HttpTransport;

/// Operations an engine service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    Recognize,
    DetectRegions,
    GetSupportedLanguages,
    GetSupportedModels,
    InstallModel,
    UpdateSettings,
    GetHardwareAccelerationOptions,
    KeepAlive,
    MotionDetection,
}

impl RpcMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RpcMethod::Recognize => "RecognizeBase64",
            RpcMethod::DetectRegions => "DetectBase64",
            RpcMethod::GetSupportedLanguages => "GetSupportedLanguages",
            RpcMethod::GetSupportedModels => "GetSupportedModels",
            RpcMethod::InstallModel => "InstallModel",
            RpcMethod::UpdateSettings => "UpdateSettings",
            RpcMethod::GetHardwareAccelerationOptions => "GetHardwareAccelerationOptions",
            RpcMethod::KeepAlive => "KeepAlive",
            RpcMethod::MotionDetection => "MotionDetection",
        }
    }
}

impl std::fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live connection to one engine.
///
/// Errors for which [`crate::EngineError::is_transport`] holds mean the
/// connection is unusable; anything else is a per-call failure.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, method: RpcMethod, payload: serde_json::Value) -> EngineResult<serde_json::Value>;
}

/// Builds a transport for the address an engine announced.
pub type TransportFactory = Arc<dyn Fn(&str) -> EngineResult<Arc<dyn Transport>> + Send + Sync>;

/// Factory producing [`HttpTransport`]s with the given request timeout.
pub fn http_transport_factory(timeout: std::time::Duration) -> TransportFactory {
    Arc::new(move |address: &str| {
        let transport = HttpTransport::new(address, timeout)?;
        Ok(Arc::new(transport) as Arc<dyn Transport>)
    })
}
