//! Readiness announcement printed by engines on stdout:
//! `[INFO-JSON]:{"server_address": "host:port"}`.

use serde::Deserialize;

use crate::error::{EngineError, EngineResult};

pub const HANDSHAKE_MARKER: &str = "[INFO-JSON]:";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HandshakeInfo {
    pub server_address: String,
}

impl HandshakeInfo {
    /// Address to dial. Wildcard bind addresses are replaced by loopback.
    pub fn connect_address(&self) -> String {
        let addr = self.server_address.trim();
        for wildcard in ["0.0.0.0:", "[::]:", "localhost:"] {
            if let Some(port) = addr.strip_prefix(wildcard) {
                return format!("127.0.0.1:{port}");
            }
        }
        addr.to_string()
    }
}

/// Parse one stdout line.
///
/// Returns `None` for ordinary log output, `Some(Err)` when the marker is present
/// but the payload is unusable.
pub fn parse_handshake_line(line: &str) -> Option<EngineResult<HandshakeInfo>> {
    let (_, payload) = line.split_once(HANDSHAKE_MARKER)?;
    let parsed = serde_json::from_str::<HandshakeInfo>(payload.trim())
        .map_err(|e| EngineError::Handshake(format!("{e}: {payload}")))
        .and_then(|info| {
            if info.server_address.trim().is_empty() {
                Err(EngineError::Handshake("empty server_address".into()))
            } else {
                Ok(info)
            }
        });
    Some(parsed)
}
