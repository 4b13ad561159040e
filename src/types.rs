//! Shared types for the parcel tracker.
//!
//! These types form the data model passed between the config loader,
//! the scrape executors, the fan-out tracker, the scheduler and the
//! result sink.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One tracking code to look up, tagged with a caller-chosen label.
///
/// Labels are unique within a cycle; the config loader enforces this.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackingRequest {
    pub label: String,
    pub code: String,
}

impl TrackingRequest {
    pub fn new(label: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            code: code.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of one scrape: either the raw payload or the failure reason.
///
/// Serialises as `{"label", "code", "results"}`, with `results: null` and
/// an extra `"error"` field when the scrape failed.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingResult {
    pub label: String,
    pub code: String,
    pub payload: Option<Vec<u8>>,
    pub error: Option<String>,
}

impl TrackingResult {
    pub fn success(request: &TrackingRequest, payload: Vec<u8>) -> Self {
        Self {
            label: request.label.clone(),
            code: request.code.clone(),
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failure(request: &TrackingRequest, error: impl fmt::Display) -> Self {
        Self {
            label: request.label.clone(),
            code: request.code.clone(),
            payload: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl Serialize for TrackingResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let len = if self.error.is_some() { 4 } else { 3 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("label", &self.label)?;
        map.serialize_entry("code", &self.code)?;
        match self.payload.as_deref() {
            // Valid JSON is embedded verbatim, key order and all.
            Some(bytes) => match serde_json::from_slice::<&RawValue>(bytes) {
                Ok(raw) => map.serialize_entry("results", raw)?,
                Err(_) => map.serialize_entry("results", &String::from_utf8_lossy(bytes))?,
            },
            None => map.serialize_entry("results", &Value::Null)?,
        }
        if let Some(ref error) = self.error {
            map.serialize_entry("error", error)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

/// The full result set of one fan-out pass over every request.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per request, sorted by label.
    pub results: Vec<TrackingResult>,
}

impl CycleReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cycle {} | {} results | ok: {} | failed: {} | {}ms",
            self.id,
            self.results.len(),
            self.succeeded(),
            self.failed(),
            self.elapsed_ms(),
        )
    }
}

// ---------------------------------------------------------------------------
// Scheduler state
// ---------------------------------------------------------------------------

/// Where the scheduler loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePhase {
    Idle,
    Running,
    Waiting,
    Terminated,
}

/// Why the scheduler stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Interval of zero: one cycle, then exit.
    SingleShot,
    /// SIGINT / SIGTERM (or any other trigger of the shutdown channel).
    Signal,
    /// The optional `stop_after` deadline elapsed.
    Deadline,
}

/// Scheduler bookkeeping, owned by the scheduler loop.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    pub phase: SchedulePhase,
    pub cycles_run: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    /// When the next cycle is due, while waiting.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Absolute time after which no new cycle starts.
    pub deadline: Option<DateTime<Utc>>,
    pub shutting_down: bool,
    pub stop_reason: Option<StopReason>,
}

impl ScheduleState {
    pub fn new(deadline: Option<DateTime<Utc>>) -> Self {
        Self {
            phase: SchedulePhase::Idle,
            cycles_run: 0,
            last_run_at: None,
            next_run_at: None,
            deadline,
            shutting_down: false,
            stop_reason: None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == SchedulePhase::Terminated
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the tracker.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scrape failed for {code}: {message}")]
    Scrape { code: String, message: String },

    #[error("Scrape for {code} timed out after {secs}s")]
    Timeout { code: String, secs: u64 },

    #[error("Aggregation error: {0}")]
    Aggregation(String),
}

impl TrackerError {
    pub fn scrape(code: &str, message: impl Into<String>) -> Self {
        TrackerError::Scrape {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
