//! HTTP scraper.
//!
//! Fetches a tracking endpoint directly, for aggregators that expose the
//! parcel status as a plain GET. The configured URL template carries a
//! `{code}` placeholder that is replaced by the URL-encoded tracking code.
//! The response body is returned untouched.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::Scraper;
use crate::config::HttpConfig;
use crate::types::{TrackerError, TrackingRequest};

const PROVIDER_NAME: &str = "http";

pub struct HttpScraper {
    http: Client,
    url_template: String,
    timeout: Duration,
}

impl HttpScraper {
    pub fn new(url_template: impl Into<String>, timeout: Duration, user_agent: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to build HTTP client for tracking endpoint")?;

        Ok(Self {
            http,
            url_template: url_template.into(),
            timeout,
        })
    }

    pub fn from_config(cfg: &HttpConfig) -> Result<Self> {
        Self::new(
            cfg.url_template.clone(),
            Duration::from_secs(cfg.timeout_secs),
            &cfg.user_agent,
        )
    }

    fn url_for(&self, code: &str) -> String {
        self.url_template
            .replace("{code}", &urlencoding::encode(code))
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn scrape(&self, request: &TrackingRequest) -> Result<Vec<u8>, TrackerError> {
        let code = request.code.as_str();
        let url = self.url_for(code);
        debug!(label = %request.label, %url, "Fetching tracking endpoint");

        let resp = self.http.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                TrackerError::Timeout {
                    code: code.to_string(),
                    secs: self.timeout.as_secs(),
                }
            } else {
                TrackerError::scrape(code, format!("request failed: {e}"))
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();
            return Err(TrackerError::scrape(code, format!("HTTP {status}: {body}")));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TrackerError::scrape(code, format!("failed to read body: {e}")))?;

        if bytes.is_empty() {
            return Err(TrackerError::scrape(code, "empty response body"));
        }

        Ok(bytes.to_vec())
    }

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
