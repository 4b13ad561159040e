//! parcel-tracker entry point.
//!
//! Loads configuration, initialises structured logging (stderr), wires
//! SIGINT/SIGTERM to the scheduler's shutdown channel, and runs the
//! track → print loop. Results go to stdout as JSON, one batch per cycle.

use anyhow::{bail, Result};
use tracing::{error, info, warn};

use parcel_tracker::config::AppConfig;
use parcel_tracker::engine::scheduler::{relay_signals, shutdown_channel, Scheduler};
use parcel_tracker::engine::tracker::FanOutTracker;
use parcel_tracker::output::JsonSink;
use parcel_tracker::scrapers::build_scraper;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();

    // Any config problem is fatal before a single cycle runs
    let path = AppConfig::resolve_path();
    let cfg = AppConfig::load(&path)?;

    info!(
        config = %path,
        codes = cfg.tracking_codes.len(),
        provider = ?cfg.trackers.provider,
        update_every_secs = cfg.update_every.as_secs_f64(),
        max_concurrency = ?cfg.max_concurrency(),
        output = ?cfg.output,
        "parcel-tracker starting up"
    );
    if cfg.tracking_codes.is_empty() {
        warn!("No tracking codes configured; cycles will be empty");
    }

    // -- Initialise components -------------------------------------------

    let scraper = build_scraper(&cfg.trackers)?;
    let tracker = FanOutTracker::new(scraper, cfg.max_concurrency());
    let sink = JsonSink::stdout(cfg.output);

    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    // -- Main loop -------------------------------------------------------

    let mut scheduler = Scheduler::new(
        tracker,
        Box::new(sink),
        cfg.requests(),
        cfg.update_every,
        cfg.stop_after,
        shutdown_rx,
    );

    // A second signal drops the running cycle; scrape processes are killed
    // as their tasks are torn down with the runtime.
    let state = tokio::select! {
        res = scheduler.run() => res?,
        signal = relay_signals(shutdown_tx, wait_for_signal) => {
            bail!("interrupted by second {signal} before the cycle finished");
        }
    };

    info!(
        cycles = state.cycles_run,
        reason = ?state.stop_reason,
        "parcel-tracker shut down cleanly."
    );

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler, SIGINT only");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Signal listener error");
            }
            return "SIGINT";
        }
    };

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!(error = %e, "Signal listener error");
            }
            "SIGINT"
        }
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Signal listener error");
    }
    "CTRL_C"
}

/// Initialise the `tracing` subscriber. Logs go to stderr; stdout is
/// reserved for results.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parcel_tracker=info"));

    let json_logging = std::env::var("PARCEL_TRACKER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    }
}
