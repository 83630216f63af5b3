use std::time::Duration;

use anyhow::{Context, Result};
use glasses_core::transport::{Transport, TransportError, TransportResponse};
use reqwest::{blocking::Client, header::CONTENT_TYPE};

/// Blocking reqwest client used by the capture pipeline thread.
pub(crate) struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub(crate) fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn post(
        &self,
        url: &str,
        json_body: &str,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .body(json_body.to_owned())
            .send()
            .map_err(|err| classify(url, timeout, err))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| classify(url, timeout, err))?;
        Ok(TransportResponse { status, body })
    }
}

fn classify(url: &str, timeout: Duration, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
            timeout,
        }
    } else if err.is_connect() {
        TransportError::Unreachable {
            url: url.to_string(),
            message: err.to_string(),
        }
    } else {
        TransportError::Other(err.to_string())
    }
}
