//! Stub scraper for integration testing.
//!
//! Provides a deterministic `Scraper` implementation that answers from an
//! in-memory table of tracking code → payload or error, optionally after a
//! per-code delay, and counts every call. No processes, no network.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parcel_tracker::output::ResultSink;
use parcel_tracker::scrapers::Scraper;
use parcel_tracker::types::{CycleReport, TrackerError, TrackingRequest};

#[derive(Clone)]
enum Reply {
    Payload(Vec<u8>),
    Error(String),
}

/// A stub scrape executor. Unknown codes fail like a missing UI element.
#[derive(Default)]
pub struct StubScraper {
    replies: HashMap<String, Reply>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
    calls_by_code: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StubScraper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `code` with `payload`.
    pub fn with_payload(mut self, code: &str, payload: &str) -> Self {
        self.replies
            .insert(code.to_string(), Reply::Payload(payload.as_bytes().to_vec()));
        self
    }

    /// Fail `code` with `message`.
    pub fn with_error(mut self, code: &str, message: &str) -> Self {
        self.replies
            .insert(code.to_string(), Reply::Error(message.to_string()));
        self
    }

    /// Take `delay` before answering `code`.
    pub fn with_delay(mut self, code: &str, delay: Duration) -> Self {
        self.delays.insert(code.to_string(), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, code: &str) -> usize {
        self.calls_by_code
            .lock()
            .unwrap()
            .get(code)
            .copied()
            .unwrap_or(0)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scraper for StubScraper {
    async fn scrape(&self, request: &TrackingRequest) -> Result<Vec<u8>, TrackerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_by_code
            .lock()
            .unwrap()
            .entry(request.code.clone())
            .or_insert(0) += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(&request.code) {
            tokio::time::sleep(*delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.replies.get(&request.code) {
            Some(Reply::Payload(bytes)) => Ok(bytes.clone()),
            Some(Reply::Error(msg)) => Err(TrackerError::scrape(&request.code, msg.clone())),
            None => Err(TrackerError::scrape(
                &request.code,
                "expected response element not found",
            )),
        }
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Collects emitted cycles in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    pub reports: Arc<Mutex<Vec<CycleReport>>>,
}

impl MemorySink {
    pub fn count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }
}

impl ResultSink for MemorySink {
    fn emit(&mut self, report: &CycleReport) -> anyhow::Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

/// A `Write` whose bytes can be read back after the sink is boxed away.
#[derive(Clone, Default)]
pub struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn requests(pairs: &[(&str, &str)]) -> Vec<TrackingRequest> {
    pairs
        .iter()
        .map(|(label, code)| TrackingRequest::new(*label, *code))
        .collect()
}

pub fn shared(stub: StubScraper) -> Arc<StubScraper> {
    Arc::new(stub)
}
