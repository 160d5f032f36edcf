use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use pact_types::error::EngineError;

/// Upstream timeout. The crisis path must answer fast; a slow provider is
/// treated the same as a dead one.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(2);

/// Client for the optional synthetic-response content provider. When the
/// provider is unconfigured, unreachable, or slow, callers fall back to the
/// static template tables — `UpstreamUnavailable` never reaches a client.
#[derive(Clone)]
pub struct SupportContentClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl SupportContentClient {
    pub fn new(base_url: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http, base_url }
    }

    pub async fn fetch(
        &self,
        goal_category: Option<&str>,
        context: &str,
    ) -> Result<String, EngineError> {
        let base = self
            .base_url
            .as_deref()
            .ok_or(EngineError::UpstreamUnavailable)?;

        #[derive(Deserialize)]
        struct SupportText {
            text: String,
        }

        let response = self
            .http
            .post(format!("{base}/support"))
            .json(&serde_json::json!({
                "goal_category": goal_category,
                "context": context,
            }))
            .send()
            .await
            .map_err(|e| {
                debug!("support content provider unreachable: {}", e);
                EngineError::UpstreamUnavailable
            })?;

        if !response.status().is_success() {
            debug!("support content provider returned {}", response.status());
            return Err(EngineError::UpstreamUnavailable);
        }

        let body: SupportText = response
            .json()
            .await
            .map_err(|_| EngineError::UpstreamUnavailable)?;

        if body.text.trim().is_empty() {
            return Err(EngineError::UpstreamUnavailable);
        }
        Ok(body.text)
    }
}
