//! Fan-out tracker.
//!
//! Runs one scrape unit per tracking request concurrently, collects every
//! unit's result over a channel sized to the request count, and returns
//! once all units have reported. A failing (or panicking) unit becomes an
//! error-carrying result for its own label; it never aborts its siblings.
//!
//! Guarantee: the returned report holds exactly one result per distinct
//! request label, sorted by label.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::scrapers::Scraper;
use crate::types::{CycleReport, TrackerError, TrackingRequest, TrackingResult};

pub struct FanOutTracker {
    scraper: Arc<dyn Scraper>,
    /// Caps simultaneous scrapes; `None` runs every request at once.
    limit: Option<Arc<Semaphore>>,
    max_concurrency: Option<usize>,
}

impl FanOutTracker {
    pub fn new(scraper: Arc<dyn Scraper>, max_concurrency: Option<usize>) -> Self {
        let max_concurrency = max_concurrency.filter(|&n| n > 0);
        Self {
            scraper,
            limit: max_concurrency.map(|n| Arc::new(Semaphore::new(n))),
            max_concurrency,
        }
    }

    pub fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }

    /// Scrape every request concurrently and wait for all of them.
    pub async fn run_cycle(&self, requests: &[TrackingRequest]) -> CycleReport {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let requests = unique_by_label(requests);

        if requests.is_empty() {
            debug!(cycle = %id, "No tracking requests, empty cycle");
            return CycleReport {
                id,
                started_at,
                finished_at: Utc::now(),
                results: Vec::new(),
            };
        }

        info!(
            cycle = %id,
            count = requests.len(),
            provider = self.scraper.name(),
            max_concurrency = ?self.max_concurrency,
            "Starting cycle"
        );

        // Each unit sends exactly once, so a buffer of N never blocks a sender.
        let (tx, mut rx) = mpsc::channel::<TrackingResult>(requests.len());
        let mut units = JoinSet::new();

        for request in requests.iter().map(|r| (*r).clone()) {
            let tx = tx.clone();
            let scraper = Arc::clone(&self.scraper);
            let limit = self.limit.clone();

            units.spawn(async move {
                let _permit = match limit {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };

                let result = match scraper.scrape(&request).await {
                    Ok(payload) => {
                        debug!(label = %request.label, code = %request.code, "Scrape succeeded");
                        TrackingResult::success(&request, payload)
                    }
                    Err(e) => {
                        warn!(label = %request.label, code = %request.code, error = %e, "Scrape failed");
                        TrackingResult::failure(&request, &e)
                    }
                };

                if tx.send(result).await.is_err() {
                    error!(label = %request.label, "Result channel closed before unit reported");
                }
            });
        }
        drop(tx);

        // Drains in arrival order; ends once every unit has dropped its sender.
        let mut aggregator = Aggregator::new(&requests);
        while let Some(result) = rx.recv().await {
            aggregator.accept(result);
        }

        while let Some(joined) = units.join_next().await {
            if let Err(e) = joined {
                error!(cycle = %id, error = %e, "Scrape unit aborted");
            }
        }

        let results = aggregator.finish();
        let report = CycleReport {
            id,
            started_at,
            finished_at: Utc::now(),
            results,
        };

        info!(
            cycle = %id,
            total = report.results.len(),
            ok = report.succeeded(),
            failed = report.failed(),
            elapsed_ms = report.elapsed_ms(),
            "Cycle complete"
        );
        report
    }
}

/// Drop repeated labels (keeping the first), reporting each as a config defect.
fn unique_by_label(requests: &[TrackingRequest]) -> Vec<&TrackingRequest> {
    let mut seen = HashSet::with_capacity(requests.len());
    requests
        .iter()
        .filter(|r| {
            let fresh = seen.insert(r.label.as_str());
            if !fresh {
                let err = TrackerError::Config(format!(
                    "duplicate label {:?} (code {}) skipped",
                    r.label, r.code
                ));
                error!(error = %err, "Invalid tracking request");
            }
            fresh
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Matches incoming results against the outstanding requests.
///
/// Accepts at most one result per known label. Anything else is logged as
/// an aggregation error and discarded. Labels that never reported are
/// filled in with an error result by `finish`.
struct Aggregator<'a> {
    pending: HashMap<&'a str, &'a TrackingRequest>,
    results: Vec<TrackingResult>,
}

impl<'a> Aggregator<'a> {
    fn new(requests: &[&'a TrackingRequest]) -> Self {
        Self {
            pending: requests.iter().map(|r| (r.label.as_str(), *r)).collect(),
            results: Vec::with_capacity(requests.len()),
        }
    }

    fn accept(&mut self, result: TrackingResult) {
        if self.pending.remove(result.label.as_str()).is_some() {
            debug!(label = %result.label, remaining = self.pending.len(), "Result collected");
            self.results.push(result);
        } else {
            let err = TrackerError::Aggregation(format!(
                "unexpected result for label {:?} (duplicate or unknown)",
                result.label
            ));
            error!(error = %err, "Discarding result");
        }
    }

    fn finish(mut self) -> Vec<TrackingResult> {
        for (label, request) in self.pending.drain() {
            let err = TrackerError::Aggregation(format!(
                "scrape unit for {label:?} ended without reporting"
            ));
            error!(error = %err, "Missing result");
            self.results.push(TrackingResult::failure(request, &err));
        }
        self.results.sort_by(|a, b| a.label.cmp(&b.label));
        self.results
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
