//! HTTP adapter for the authoritative store server.
//!
//! Reads and writes are plain JSON requests against `/api/tree/{path}`.
//! Subscriptions hold a server-sent-events stream open on
//! `/api/subscribe/{path}` and reopen it after `retry_delay` whenever it
//! drops, for as long as the subscription lives. Connectivity is probed
//! client-side against `/health`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::tree::{is_connected_path, normalize};
use super::{RemoteEvent, RemoteStore, RemoteSubscription};
use crate::config::SyncConfig;
use crate::errors::{ErrorDetails, SyncError};

/// Header carrying the pre-shared key.
const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<ErrorDetails>,
}

/// Remote store reached over HTTP.
#[derive(Clone)]
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
    api_psk: Option<String>,
    request_timeout: Duration,
    probe_interval: Duration,
    retry_delay: Duration,
}

impl HttpRemoteStore {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.remote_url.trim_end_matches('/').to_string(),
            api_psk: config.api_psk.clone(),
            request_timeout: config.request_timeout,
            probe_interval: config.probe_interval,
            retry_delay: config.retry_delay,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, route: &str, path: &str) -> String {
        format!("{}/api/{}/{}", self.base_url, route, normalize(path))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_psk {
            Some(psk) => request.header(API_KEY_HEADER, psk),
            None => request,
        }
    }

    /// One connectivity probe.
    pub async fn probe(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(self.request_timeout)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Connectivity probe failed: {}", e);
                false
            }
        }
    }

    async fn run_probe(self, tx: mpsc::UnboundedSender<RemoteEvent>) {
        loop {
            let reachable = self.probe().await;
            if tx
                .send(RemoteEvent::Value(Some(Value::Bool(reachable))))
                .is_err()
            {
                return;
            }
            tokio::time::sleep(self.probe_interval).await;
        }
    }

    async fn open_stream(&self, path: &str) -> Result<reqwest::Response, String> {
        let response = self
            .authorized(self.client.get(self.url("subscribe", path)))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(error_message(response).await);
        }
        Ok(response)
    }

    async fn run_stream(self, path: String, tx: mpsc::UnboundedSender<RemoteEvent>) {
        loop {
            match self.open_stream(&path).await {
                Ok(response) => {
                    tracing::debug!("Subscription stream opened for {}", path);
                    let mut stream = response.bytes_stream();
                    let mut buffer: Vec<u8> = Vec::new();

                    while let Some(chunk) = stream.next().await {
                        match chunk {
                            Ok(bytes) => {
                                buffer.extend_from_slice(&bytes);
                                for data in extract_sse_data(&mut buffer) {
                                    if tx.send(decode_event(&data)).is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                if tx.send(RemoteEvent::Error(e.to_string())).is_err() {
                                    return;
                                }
                                break;
                            }
                        }
                    }
                    tracing::debug!("Subscription stream for {} ended", path);
                }
                Err(message) => {
                    if tx.send(RemoteEvent::Error(message)).is_err() {
                        return;
                    }
                }
            }

            if tx.is_closed() {
                return;
            }
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, SyncError> {
        if is_connected_path(path) {
            return Ok(Some(Value::Bool(self.probe().await)));
        }

        let response = self
            .authorized(self.client.get(self.url("tree", path)))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| SyncError::remote_read(path, e.to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::remote_read(path, error_message(response).await));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| SyncError::remote_read(path, e.to_string()))?;

        if !envelope.success {
            let message = envelope
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "request failed".to_string());
            return Err(SyncError::remote_read(path, message));
        }

        Ok(envelope.data.filter(|v| !v.is_null()))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), SyncError> {
        let response = self
            .authorized(self.client.put(self.url("tree", path)))
            .timeout(self.request_timeout)
            .json(&value)
            .send()
            .await
            .map_err(|e| SyncError::remote_write(path, e.to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::remote_write(path, error_message(response).await));
        }
        Ok(())
    }

    fn subscribe(&self, path: &str) -> RemoteSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = self.clone();

        let task = if is_connected_path(path) {
            tokio::spawn(store.run_probe(tx))
        } else {
            tokio::spawn(store.run_stream(normalize(path), tx))
        };

        RemoteSubscription::new(path, rx, move || task.abort())
    }
}

/// Best-effort error text from a failed response.
async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<Envelope>().await {
        Ok(Envelope {
            error: Some(error), ..
        }) => format!("{} ({})", error.message, status),
        _ => format!("HTTP {}", status),
    }
}

fn decode_event(data: &str) -> RemoteEvent {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Null) => RemoteEvent::Value(None),
        Ok(value) => RemoteEvent::Value(Some(value)),
        Err(e) => RemoteEvent::Error(format!("Undecodable event payload: {}", e)),
    }
}

/// Drain complete SSE events from `buffer`, returning their `data` payloads.
/// Comment-only events (keep-alives) produce nothing.
fn extract_sse_data(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(end) = find_event_end(buffer) {
        let (event_len, separator_len) = end;
        let event: Vec<u8> = buffer.drain(..event_len + separator_len).collect();
        let text = String::from_utf8_lossy(&event[..event_len]);

        let data: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|value| value.strip_prefix(' ').unwrap_or(value))
            .collect();

        if !data.is_empty() {
            payloads.push(data.join("\n"));
        }
    }

    payloads
}

/// Position and length of the first blank-line separator.
fn find_event_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (i, 4));

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_sse_data_handles_split_chunks() {
        let mut buffer = b"data: {\"a\":".to_vec();
        assert!(extract_sse_data(&mut buffer).is_empty());

        buffer.extend_from_slice(b"1}\n\n:keep-alive\n\ndata:null\n\n");
        let payloads = extract_sse_data(&mut buffer);

        assert_eq!(payloads, vec!["{\"a\":1}".to_string(), "null".to_string()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_extract_sse_data_crlf() {
        let mut buffer = b"data: true\r\n\r\ndata: fal".to_vec();
        assert_eq!(extract_sse_data(&mut buffer), vec!["true".to_string()]);
        assert_eq!(buffer, b"data: fal".to_vec());
    }

    #[test]
    fn test_decode_event() {
        assert_eq!(decode_event("null"), RemoteEvent::Value(None));
        assert_eq!(decode_event("{\"x\":1}"), RemoteEvent::Value(Some(json!({ "x": 1 }))));
        assert!(matches!(decode_event("{oops"), RemoteEvent::Error(_)));
    }

    #[test]
    fn test_urls() {
        let config = SyncConfig {
            remote_url: "http://localhost:9000/".to_string(),
            ..Default::default()
        };
        let store = HttpRemoteStore::new(&config).unwrap();
        assert_eq!(store.base_url(), "http://localhost:9000");
        assert_eq!(
            store.url("tree", "/board/settings/"),
            "http://localhost:9000/api/tree/board/settings"
        );
    }
}
