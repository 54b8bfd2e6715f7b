//! HTTP implementation of the telemetry client.
//!
//! Talks to StreamHub-style REST endpoints. Field hardware is rarely
//! well-behaved: some firmwares serve JSON with a `text/html` content
//! type, and unauthenticated requests come back as redirects to a login
//! page. Both are handled here rather than rejected outright.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use streamwatch_core::DeviceConfig;

use crate::{FetchError, FetchResult, RawPayload, TelemetryClient};

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct StreamHubClientConfig {
    /// Per-call timeout; the scheduler keeps this below the poll interval
    pub timeout: Duration,
    /// Path of the consolidated status document
    pub status_path: String,
}

impl Default for StreamHubClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            status_path: "/".to_string(),
        }
    }
}

/// HTTP telemetry client for StreamHub-style devices.
pub struct StreamHubClient {
    client: Client,
    config: StreamHubClientConfig,
}

impl StreamHubClient {
    /// Create a client with the given per-call timeout.
    pub fn new(config: StreamHubClientConfig) -> Self {
        let client = Client::builder()
            .user_agent(concat!("streamwatch/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    /// Build the status URL for a device, appending the API key if set.
    fn status_url(&self, device: &DeviceConfig) -> String {
        let base = device.base_url.trim_end_matches('/');
        let path = self.config.status_path.trim_start_matches('/');
        match &device.api_token {
            Some(token) => format!("{base}/{path}?api_key={token}"),
            None => format!("{base}/{path}"),
        }
    }
}

#[async_trait]
impl TelemetryClient for StreamHubClient {
    async fn fetch(&self, device: &DeviceConfig) -> FetchResult<RawPayload> {
        let url = self.status_url(device);
        debug!(device_id = %device.id, %url, "fetching device status");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.is_redirection() {
            let location = response
                .headers()
                .get("location")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("<unknown>");
            return Err(FetchError::Protocol(format!(
                "redirect {status} to {location}"
            )));
        }
        if !status.is_success() {
            return Err(FetchError::Protocol(format!("HTTP status {status}")));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let text = response
            .text()
            .await
            .map_err(|e| FetchError::Protocol(format!("body read failed: {e}")))?;

        let body = parse_status_body(&content_type, &text)?;
        Ok(RawPayload::new(Utc::now(), body))
    }
}

/// Map a reqwest error to the adapter's failure taxonomy.
fn classify_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_connect() || e.is_request() {
        FetchError::Unreachable(e.to_string())
    } else {
        FetchError::Protocol(e.to_string())
    }
}

/// Decode a response body that should be JSON but might be mislabeled.
///
/// Accepts a JSON body regardless of content type; anything that does not
/// decode is a protocol error carrying a short diagnostic preview.
fn parse_status_body(content_type: &str, text: &str) -> FetchResult<Value> {
    if content_type.contains("application/json") {
        return serde_json::from_str(text)
            .map_err(|e| FetchError::Protocol(format!("JSON parse error: {e}")));
    }

    let probe = text.trim_start();
    if probe.starts_with('{') || probe.starts_with('[') {
        if let Ok(value) = serde_json::from_str(probe) {
            return Ok(value);
        }
    }

    let preview: String = text.chars().take(120).collect();
    Err(FetchError::Protocol(format!(
        "non-JSON response (content-type {content_type}): {}",
        preview.replace('\n', " ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_url_with_token() {
        let client = StreamHubClient::new(StreamHubClientConfig::default());
        let device = DeviceConfig::new("d1", "Unit", "http://10.0.0.2:8893/").with_token("k3y");
        assert_eq!(client.status_url(&device), "http://10.0.0.2:8893/?api_key=k3y");
    }

    #[test]
    fn test_status_url_without_token() {
        let client = StreamHubClient::new(StreamHubClientConfig {
            status_path: "/status".into(),
            ..Default::default()
        });
        let device = DeviceConfig::new("d1", "Unit", "http://10.0.0.2:8893");
        assert_eq!(client.status_url(&device), "http://10.0.0.2:8893/status");
    }

    #[test]
    fn test_parse_json_with_wrong_content_type() {
        let body = parse_status_body("text/html", r#"{"status": "on"}"#).expect("parse");
        assert_eq!(body["status"], "on");
    }

    #[test]
    fn test_parse_rejects_html() {
        let err = parse_status_body("text/html", "<html><body>login</body></html>");
        assert!(matches!(err, Err(FetchError::Protocol(_))));
    }

    #[test]
    fn test_parse_rejects_truncated_json() {
        let err = parse_status_body("application/json", r#"{"status": "#);
        assert!(matches!(err, Err(FetchError::Protocol(_))));
    }
}
