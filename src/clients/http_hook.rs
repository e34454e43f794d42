//! Validation hook that asks an HTTP endpoint.
//!
//! Sends `GET {url}?name=..&version=..&checksum=..&ring=..` and expects
//! `{"signal": "pass" | "fail" | "no_signal"}`. A 404 means the endpoint
//! knows nothing about the version yet and reads as no signal.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::interfaces::{HookError, ValidationHook, ValidationSignal};
use crate::model::{CatalogRing, PackageVersion};

#[derive(Debug, Deserialize)]
struct HookResponse {
    signal: ValidationSignal,
}

pub struct HttpValidationHook {
    client: Client,
    url: String,
}

impl HttpValidationHook {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, HookError> {
        let url = url.into();
        if url.is_empty() {
            return Err(HookError::Transport("validation hook URL not configured".into()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HookError::Transport(e.to_string()))?;
        Ok(Self { client, url })
    }

    fn map_error(err: reqwest::Error) -> HookError {
        if err.is_timeout() {
            HookError::Timeout
        } else if err.is_decode() {
            HookError::InvalidResponse(err.to_string())
        } else {
            HookError::Transport(err.to_string())
        }
    }

    fn is_retryable_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }
}

#[async_trait]
impl ValidationHook for HttpValidationHook {
    async fn check(
        &self,
        version: &PackageVersion,
        ring: &CatalogRing,
    ) -> Result<ValidationSignal, HookError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("name", version.key.name.as_str()),
                ("version", version.key.version.as_str()),
                ("checksum", version.checksum.as_str()),
                ("ring", ring.name.as_str()),
            ])
            .send()
            .await
            .map_err(Self::map_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(package = %version.key, url = %self.url, "Validation endpoint has no record");
            return Ok(ValidationSignal::NoSignal);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = format!("HTTP {} - {}", status, body.chars().take(200).collect::<String>());
            warn!(package = %version.key, url = %self.url, %status, "Validation endpoint error");
            return Err(if Self::is_retryable_status(status) {
                HookError::Transport(detail)
            } else {
                HookError::InvalidResponse(detail)
            });
        }

        let body: HookResponse = response.json().await.map_err(Self::map_error)?;
        Ok(body.signal)
    }
}
