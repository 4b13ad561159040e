//! Configuration loading from JSON (or TOML).
//!
//! Reads `config.json` and deserializes into strongly-typed structs.
//! A path ending in `.toml` is parsed as TOML with the same schema.
//! Every failure here is fatal: the tracker refuses to start on a
//! config it cannot fully understand.

use anyhow::{Context, Result};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::output::OutputFormat;
use crate::types::{TrackerError, TrackingRequest};

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "PARCEL_TRACKER_CONFIG";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub tracking_codes: TrackingCodes,
    #[serde(default)]
    pub trackers: TrackersConfig,
    /// Poll interval. Zero means run a single cycle and exit.
    #[serde(default, deserialize_with = "de_duration")]
    pub update_every: Duration,
    /// Stop scheduling new cycles this long after start.
    #[serde(default, deserialize_with = "de_opt_duration")]
    pub stop_after: Option<Duration>,
    #[serde(default)]
    pub output: OutputFormat,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TrackersConfig {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub parcels_app: ParcelsAppConfig,
    #[serde(default)]
    pub http: Option<HttpConfig>,
    /// Maximum simultaneous scrapes per cycle. `0` = one per request.
    #[serde(default)]
    pub max_concurrency: usize,
}

/// Which scrape executor is active. Only one runs at a time.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    ParcelsApp,
    Http,
}

/// Settings for the process-driven executor: `<node_path> [args..] <script_path> <code>`.
#[derive(Debug, Deserialize, Clone)]
pub struct ParcelsAppConfig {
    #[serde(default = "default_node_path")]
    pub node_path: String,
    #[serde(default = "default_script_path")]
    pub script_path: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_script_timeout")]
    pub timeout_secs: u64,
}

impl Default for ParcelsAppConfig {
    fn default() -> Self {
        Self {
            node_path: default_node_path(),
            script_path: default_script_path(),
            args: Vec::new(),
            timeout_secs: default_script_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// URL with a `{code}` placeholder.
    pub url_template: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_node_path() -> String {
    "node".to_string()
}

fn default_script_path() -> String {
    "scripts/parcelsapp.js".to_string()
}

fn default_script_timeout() -> u64 {
    120
}

fn default_http_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("parcel-tracker/", env!("CARGO_PKG_VERSION")).to_string()
}

impl AppConfig {
    /// Load and validate configuration from a JSON or TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;

        let is_toml = Path::new(path)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let config: AppConfig = if is_toml {
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {path}"))?
        } else {
            Self::from_json(&contents)
                .with_context(|| format!("Failed to parse config file: {path}"))?
        };

        config
            .validate()
            .with_context(|| format!("Invalid config file: {path}"))?;
        Ok(config)
    }

    /// Parse (without validating) from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolve the config path: env override, else `config.json`.
    pub fn resolve_path() -> String {
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Check everything serde can't: non-empty labels and codes, unique
    /// labels, and a usable provider section.
    pub fn validate(&self) -> Result<(), TrackerError> {
        let mut seen = HashSet::new();
        for (label, code) in self.tracking_codes.entries() {
            if label.trim().is_empty() {
                return Err(TrackerError::Config(format!(
                    "empty label for tracking code {code:?}"
                )));
            }
            if code.trim().is_empty() {
                return Err(TrackerError::Config(format!(
                    "empty tracking code for label {label:?}"
                )));
            }
            if !seen.insert(label.as_str()) {
                return Err(TrackerError::Config(format!("duplicate label {label:?}")));
            }
        }

        match self.trackers.provider {
            Provider::ParcelsApp => {
                let p = &self.trackers.parcels_app;
                if p.node_path.trim().is_empty() {
                    return Err(TrackerError::Config(
                        "trackers.parcels_app.node_path is empty".into(),
                    ));
                }
                if p.timeout_secs == 0 {
                    return Err(TrackerError::Config(
                        "trackers.parcels_app.timeout_secs must be positive".into(),
                    ));
                }
            }
            Provider::Http => {
                let http = self.trackers.http.as_ref().ok_or_else(|| {
                    TrackerError::Config("provider \"http\" needs a trackers.http section".into())
                })?;
                if !http.url_template.contains("{code}") {
                    return Err(TrackerError::Config(
                        "trackers.http.url_template must contain {code}".into(),
                    ));
                }
                if http.timeout_secs == 0 {
                    return Err(TrackerError::Config(
                        "trackers.http.timeout_secs must be positive".into(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// The requests for one cycle, in config order.
    pub fn requests(&self) -> Vec<TrackingRequest> {
        self.tracking_codes
            .entries()
            .iter()
            .map(|(label, code)| TrackingRequest::new(label.clone(), code.clone()))
            .collect()
    }

    /// `None` when concurrency is unbounded.
    pub fn max_concurrency(&self) -> Option<usize> {
        match self.trackers.max_concurrency {
            0 => None,
            n => Some(n),
        }
    }
}

// ---------------------------------------------------------------------------
// Tracking codes
// ---------------------------------------------------------------------------

/// `{label: code}` object, or a plain `[code, ...]` list where each code
/// doubles as its own label. Config order is preserved and duplicate keys
/// are kept so that validation can report them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingCodes(Vec<(String, String)>);

impl TrackingCodes {
    pub fn entries(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for TrackingCodes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CodesVisitor;

        impl<'de> Visitor<'de> for CodesVisitor {
            type Value = TrackingCodes;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of label to tracking code, or a list of tracking codes")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((label, code)) = map.next_entry::<String, String>()? {
                    entries.push((label, code));
                }
                Ok(TrackingCodes(entries))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(code) = seq.next_element::<String>()? {
                    entries.push((code.clone(), code));
                }
                Ok(TrackingCodes(entries))
            }
        }

        deserializer.deserialize_any(CodesVisitor)
    }
}

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

/// Parse `"90"`, `"90s"`, `"500ms"`, `"15m"` or `"2h"`. Bare numbers are seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, TrackerError> {
    let s = raw.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| TrackerError::Config(format!("invalid duration {raw:?}")))?;

    let duration = match unit.trim() {
        "" | "s" => Duration::from_secs(value),
        "ms" => Duration::from_millis(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        "h" => Duration::from_secs(value.saturating_mul(3600)),
        other => {
            return Err(TrackerError::Config(format!(
                "unknown duration unit {other:?} in {raw:?}"
            )))
        }
    };
    Ok(duration)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Secs(u64),
    Text(String),
}

impl RawDuration {
    fn into_duration(self) -> Result<Duration, TrackerError> {
        match self {
            RawDuration::Secs(secs) => Ok(Duration::from_secs(secs)),
            RawDuration::Text(text) => parse_duration(&text),
        }
    }
}

fn de_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    RawDuration::deserialize(deserializer)?
        .into_duration()
        .map_err(de::Error::custom)
}

fn de_opt_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    match Option::<RawDuration>::deserialize(deserializer)? {
        Some(raw) => raw.into_duration().map(Some).map_err(de::Error::custom),
        None => Ok(None),
    }
}
