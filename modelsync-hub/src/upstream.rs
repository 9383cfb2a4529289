//! HTTP client for the upstream model data source.
//!
//! Two fetch paths, tried in order by the sync pipeline: the JSON API
//! envelope (authenticated with `x-api-key` when configured) and the
//! public HTML page that feeds the extractor. Both share one pooled
//! client with the configured timeout.

use modelsync_common::config::UpstreamConfig;
use modelsync_common::records::{SourceKind, SourceObservation};
use modelsync_common::{time, Error, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::extract::observation_from_value;

const USER_AGENT: &str = concat!("modelsync-hub/", env!("CARGO_PKG_VERSION"));

/// Page fetches use a browser agent; the upstream serves the full
/// server-rendered document to browsers only.
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

pub struct UpstreamClient {
    http: reqwest::Client,
    api_url: String,
    page_url: String,
    api_key: Option<String>,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            page_url: config.page_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Fetch the JSON model envelope and map it to API observations.
    ///
    /// The envelope carries `models` at the top level or nested under
    /// `leaderboard`. An envelope with no usable models is an error so
    /// the caller can fall through to the scrape path.
    pub async fn fetch_api_observations(&self) -> Result<Vec<SourceObservation>> {
        debug!("Querying upstream model API at {}", self.api_url);

        let mut request = self
            .http
            .get(&self.api_url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("API request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "API returned HTTP {}",
                status.as_u16()
            )));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("API response was not JSON: {}", e)))?;

        let models = envelope_models(&envelope).ok_or_else(|| {
            Error::UpstreamUnavailable("API envelope had no models array".to_string())
        })?;

        let observed_at = time::now();
        let observations: Vec<SourceObservation> = models
            .iter()
            .filter_map(|raw| observation_from_value(raw, SourceKind::Api, observed_at))
            .collect();

        if observations.is_empty() {
            return Err(Error::UpstreamUnavailable(
                "API envelope contained no usable models".to_string(),
            ));
        }

        info!("Fetched {} models from upstream API", observations.len());
        Ok(observations)
    }

    /// Fetch the server-rendered page for the extractor.
    pub async fn fetch_page(&self) -> Result<String> {
        debug!("Fetching upstream page at {}", self.page_url);

        let response = self
            .http
            .get(&self.page_url)
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("Page request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "Page returned HTTP {}",
                status.as_u16()
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("Page body unreadable: {}", e)))?;

        debug!("Fetched {} bytes of page HTML", html.len());
        Ok(html)
    }
}

fn envelope_models(envelope: &Value) -> Option<&Vec<Value>> {
    envelope
        .get("models")
        .and_then(Value::as_array)
        .or_else(|| {
            envelope
                .get("leaderboard")
                .and_then(|l| l.get("models"))
                .and_then(Value::as_array)
        })
}
