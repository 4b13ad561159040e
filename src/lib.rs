//! Parcel tracker: scrapes shipment status for a set of tracking codes,
//! concurrently, once or on an interval.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod engine;
pub mod output;
pub mod scrapers;
pub mod types;
