//! Scrape executors.
//!
//! Defines the `Scraper` trait and provides implementations for:
//! - `script`: spawns an external program (node + browser-automation script)
//!   per tracking code and captures its stdout
//! - `http`: fetches a tracking endpoint directly from a URL template
//!
//! The fan-out tracker and scheduler only ever see `dyn Scraper`.

pub mod http;
pub mod script;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::{Provider, TrackersConfig};
use crate::types::{TrackerError, TrackingRequest};

use self::http::HttpScraper;
use self::script::ScriptScraper;

/// One scrape for one tracking code.
///
/// Implementors acquire and release any external resource (child process,
/// browser, connection) within the call. No retries: a failure is reported
/// once and the caller decides what to do with it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Run the scrape and return the raw response bytes.
    async fn scrape(&self, request: &TrackingRequest) -> Result<Vec<u8>, TrackerError>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}

/// Build the single active scraper from the `trackers` config section.
pub fn build_scraper(cfg: &TrackersConfig) -> Result<Arc<dyn Scraper>> {
    let scraper: Arc<dyn Scraper> = match cfg.provider {
        Provider::ParcelsApp => Arc::new(ScriptScraper::from_config(&cfg.parcels_app)),
        Provider::Http => {
            let http = cfg.http.as_ref().ok_or_else(|| {
                TrackerError::Config("provider \"http\" needs a trackers.http section".into())
            })?;
            Arc::new(HttpScraper::from_config(http)?)
        }
    };

    info!(provider = scraper.name(), "Scraper ready");
    Ok(scraper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpConfig, ParcelsAppConfig};

    #[test]
    fn test_build_default_is_script() {
        let scraper = build_scraper(&TrackersConfig::default()).unwrap();
        assert_eq!(scraper.name(), "parcels_app");
    }

    #[test]
    fn test_build_http() {
        let cfg = TrackersConfig {
            provider: Provider::Http,
            parcels_app: ParcelsAppConfig::default(),
            http: Some(HttpConfig {
                url_template: "https://tracking.example.com/{code}".into(),
                timeout_secs: 5,
                user_agent: "test".into(),
            }),
            max_concurrency: 0,
        };
        let scraper = build_scraper(&cfg).unwrap();
        assert_eq!(scraper.name(), "http");
    }

    #[test]
    fn test_build_http_without_section_fails() {
        let cfg = TrackersConfig {
            provider: Provider::Http,
            ..TrackersConfig::default()
        };
        assert!(build_scraper(&cfg).is_err());
    }
}
