//! HTTP client for the screening service.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::CallError;
use crate::request::ScreeningRequest;

/// Connection settings for the screening service.
///
/// Passed explicitly wherever a client is constructed; there is no
/// process-wide singleton holding credentials.
#[derive(Debug, Clone)]
pub struct ScreeningServiceConfig {
    pub base_url: String,
    pub api_key: String,
    pub account_id: String,
    pub timeout: Duration,
}

impl ScreeningServiceConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            account_id: account_id.into(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Parsed outcome of a successful screening call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreeningVerdict {
    /// HTTP status of the call that produced this verdict.
    pub status_code: u16,
    pub match_status: Option<String>,
    pub total_hits: Option<i64>,
    /// Reference to a secondary resource with detailed hits, when the
    /// provider exposes one.
    pub hits_resource: Option<String>,
}

impl ScreeningVerdict {
    /// Extract the verdict fields from a provider response body.
    ///
    /// Bodies with `status != "success"` still parse — the verdict fields
    /// just stay empty, mirroring how the provider reports lookups that
    /// produced nothing.
    pub fn from_response(status_code: u16, body: &Value) -> Self {
        let result = if body.get("status").and_then(Value::as_str) == Some("success") {
            body.get("result")
        } else {
            None
        };

        Self {
            status_code,
            match_status: result
                .and_then(|r| r.get("match_status"))
                .and_then(Value::as_str)
                .map(str::to_string),
            total_hits: result.and_then(|r| r.get("total_hits")).and_then(Value::as_i64),
            hits_resource: result
                .and_then(|r| r.get("hits_url"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// The narrow seam the engine calls the provider through.
#[async_trait]
pub trait ScreeningClient: Send + Sync {
    /// Perform one screening lookup.
    async fn screen(&self, request: &ScreeningRequest) -> Result<ScreeningVerdict, CallError>;

    /// Dereference a secondary hits resource returned by [`screen`].
    ///
    /// [`screen`]: ScreeningClient::screen
    async fn fetch_hits(&self, resource: &str) -> Result<Value, CallError>;
}

/// Production client speaking the provider's HTTP API via `reqwest`.
pub struct HttpScreeningClient {
    config: ScreeningServiceConfig,
    client: reqwest::Client,
}

impl HttpScreeningClient {
    pub fn new(config: ScreeningServiceConfig) -> Result<Self, CallError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("bulkscreen/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(CallError::from)?;

        Ok(Self { config, client })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("api-key", &self.config.api_key)
            .header("account-id", &self.config.account_id)
    }
}

#[async_trait]
impl ScreeningClient for HttpScreeningClient {
    async fn screen(&self, request: &ScreeningRequest) -> Result<ScreeningVerdict, CallError> {
        let response = self
            .authed(self.client.post(&self.config.base_url))
            .json(&request.payload())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CallError::Status {
                code: status.as_u16(),
                message,
            });
        }

        let body: Value = response.json().await.map_err(CallError::from)?;
        debug!(status = status.as_u16(), "screening call succeeded");
        Ok(ScreeningVerdict::from_response(status.as_u16(), &body))
    }

    async fn fetch_hits(&self, resource: &str) -> Result<Value, CallError> {
        let response = self.authed(self.client.get(resource)).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CallError::Status {
                code: status.as_u16(),
                message,
            });
        }

        response.json().await.map_err(CallError::from)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn verdict_extracts_result_fields() {
        let body = json!({
            "status": "success",
            "result": {
                "match_status": "potential_match",
                "total_hits": 4,
                "hits_url": "https://provider.example/hits/abc",
            }
        });

        let verdict = ScreeningVerdict::from_response(200, &body);
        assert_eq!(verdict.match_status.as_deref(), Some("potential_match"));
        assert_eq!(verdict.total_hits, Some(4));
        assert_eq!(
            verdict.hits_resource.as_deref(),
            Some("https://provider.example/hits/abc")
        );
    }

    #[test]
    fn non_success_status_yields_empty_verdict() {
        let body = json!({ "status": "in_progress" });
        let verdict = ScreeningVerdict::from_response(200, &body);
        assert_eq!(verdict.match_status, None);
        assert_eq!(verdict.total_hits, None);
        assert_eq!(verdict.hits_resource, None);
    }

    #[test]
    fn missing_result_fields_stay_empty() {
        let body = json!({ "status": "success", "result": {} });
        let verdict = ScreeningVerdict::from_response(200, &body);
        assert_eq!(verdict.match_status, None);
        assert_eq!(verdict.total_hits, None);
    }
}
