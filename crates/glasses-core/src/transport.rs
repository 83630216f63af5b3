//! Outbound request to the inference service and the transport seam it
//! travels through.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("could not reach {url}: {message}")]
    Unreachable { url: String, message: String },
    #[error("failed to encode request body")]
    Body(#[from] serde_json::Error),
    #[error("transport failure: {0}")]
    Other(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// HTTP client collaborator. Every call must return within `timeout`.
pub trait Transport: Send + Sync {
    fn post(
        &self,
        url: &str,
        json_body: &str,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

/// Body posted once per capture cycle.
#[derive(Debug, Serialize)]
pub struct AnalyzeRequest<'a> {
    pub image: &'a str,
    pub timestamp: i64,
    pub device_id: &'a str,
}

impl AnalyzeRequest<'_> {
    pub fn to_json(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_has_the_wire_field_names() {
        let body = AnalyzeRequest {
            image: "/9j/",
            timestamp: 1_700_000_000_000,
            device_id: "esp32_glasses_001",
        }
        .to_json()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "image": "/9j/",
                "timestamp": 1_700_000_000_000i64,
                "device_id": "esp32_glasses_001"
            })
        );
    }
}
