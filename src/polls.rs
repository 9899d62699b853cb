//! Client for the poll backend's REST API.
//!
//! Used once per initial page request to snapshot the current poll list; the
//! live pipeline never touches it.

use std::time::Duration;

use anyhow::{Context as _, Result};
use reqwest::Client;
use serde_json::Value;
use url::Url;

#[derive(Clone)]
pub struct PollClient {
    http: Client,
    base_url: Url,
}

impl PollClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid poll API base url: `{base_url}`"))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("building HTTP client")?;
        Ok(Self { http, base_url })
    }

    /// Fetch the full poll list from `{base}/questions`.
    pub async fn fetch_polls(&self) -> Result<Vec<Value>> {
        let url = self.base_url.join("questions")?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;

        let body: Value = response
            .json()
            .await
            .context("poll list response is not valid JSON")?;

        Ok(extract_results(&body))
    }
}

/// The poll API wraps its list in `{"results": [...]}`; anything else reads
/// as an empty list.
fn extract_results(body: &Value) -> Vec<Value> {
    body.get("results")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}
