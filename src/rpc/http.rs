//! JSON-over-HTTP transport: `POST http://{address}/{Operation}`.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{RpcMethod, Transport};
use crate::error::{EngineError, EngineResult};

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(address: &str, timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        Ok(Self { client, base_url })
    }

    pub fn url_for(&self, method: RpcMethod) -> String {
        format!("{}/{}", self.base_url, method)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, method: RpcMethod, payload: serde_json::Value) -> EngineResult<serde_json::Value> {
        let url = self.url_for(method);
        debug!(%url, "engine rpc");

        let response = self.client.post(&url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Transport(format!("{method} returned {status}: {body}")));
        }

        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::MalformedResponse(format!("{method}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_url_for() {
        let transport = HttpTransport::new("127.0.0.1:23456", Duration::from_secs(1)).unwrap();
        assert_eq!(
            transport.url_for(RpcMethod::Recognize),
            "http://127.0.0.1:23456/RecognizeBase64"
        );

        let transport = HttpTransport::new("http://localhost:1/", Duration::from_secs(1)).unwrap();
        assert_eq!(transport.url_for(RpcMethod::KeepAlive), "http://localhost:1/KeepAlive");
    }

    /// Answers a single request with `response` and returns what it received.
    async fn one_shot_server(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            // Read the whole request so closing the socket does not reset it.
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&received).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if received.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&received).to_string()
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_posts_json_and_parses_reply() {
        let (addr, server) = one_shot_server(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 27\r\nconnection: close\r\n\r\n{\"language_codes\":[\"ja\"]}\r\n",
        )
        .await;
        let transport = HttpTransport::new(&addr, Duration::from_secs(5)).unwrap();

        let reply = transport
            .call(RpcMethod::GetSupportedLanguages, serde_json::json!({"ocr_engine": "x"}))
            .await
            .unwrap();
        assert_eq!(reply["language_codes"][0], "ja");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /GetSupportedLanguages"));
    }

    #[tokio::test]
    async fn test_server_error_is_transport_failure() {
        let (addr, _server) = one_shot_server(
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 4\r\nconnection: close\r\n\r\nboom",
        )
        .await;
        let transport = HttpTransport::new(&addr, Duration::from_secs(5)).unwrap();

        let err = transport
            .call(RpcMethod::KeepAlive, serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let transport = HttpTransport::new(&addr, Duration::from_secs(2)).unwrap();
        let err = transport
            .call(RpcMethod::KeepAlive, serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
