use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use crate::runtime::config::CoordinatorConfig;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(30);

/// Filter applied when `RUST_LOG` is unset: crate events at `debug` keep
/// per-attempt polling decisions visible, everything else stays at `info`.
pub const DEFAULT_LOG_FILTER: &str = "info,storefetch=debug";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a compact fmt subscriber once per process.
///
/// `RUST_LOG` overrides [`DEFAULT_LOG_FILTER`]. Returns `false` when this call
/// did not install anything, either because it already ran or because the
/// application set its own global subscriber first.
pub fn init_tracing() -> bool {
    if TRACING_INIT.get().is_some() {
        return false;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let installed = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok();

    TRACING_INIT.set(()).is_ok() && installed
}

/// Counters shared by deduplicators and polling coordinators.
#[derive(Default, Debug)]
pub struct Telemetry {
    dedup_started: AtomicU64,
    dedup_joined: AtomicU64,
    attempts: AtomicU64,
    fetch_failures: AtomicU64,
    incomplete_results: AtomicU64,
    sessions_succeeded: AtomicU64,
    sessions_exhausted: AtomicU64,
    stale_discards: AtomicU64,
}

impl Telemetry {
    pub fn record_dedup_started(&self) {
        self.dedup_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dedup_joined(&self) {
        self.dedup_joined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_incomplete(&self) {
        self.incomplete_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.sessions_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exhausted(&self) {
        self.sessions_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_discard(&self) {
        self.stale_discards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            dedup_started: self.dedup_started.load(Ordering::Relaxed),
            dedup_joined: self.dedup_joined.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            incomplete_results: self.incomplete_results.load(Ordering::Relaxed),
            sessions_succeeded: self.sessions_succeeded.load(Ordering::Relaxed),
            sessions_exhausted: self.sessions_exhausted.load(Ordering::Relaxed),
            stale_discards: self.stale_discards.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub dedup_started: u64,
    pub dedup_joined: u64,
    pub attempts: u64,
    pub fetch_failures: u64,
    pub incomplete_results: u64,
    pub sessions_succeeded: u64,
    pub sessions_exhausted: u64,
    pub stale_discards: u64,
}

/// Spawns a background task that logs attempt throughput and dedup hit
/// counts every [`CoordinatorConfig::metrics_interval`] until `shutdown` is
/// cancelled. The task resolves to the number of snapshots it logged.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    config: &CoordinatorConfig,
) -> JoinHandle<u64> {
    let interval = config.metrics_interval();
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();
        let mut reports = 0u64;

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "storefetch::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let attempts_delta = current.attempts.saturating_sub(last_snapshot.attempts);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let attempt_rate = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        attempts_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "storefetch::metrics",
                        attempt_rate = format!("{attempt_rate:.2}"),
                        attempts = current.attempts,
                        dedup_started = current.dedup_started,
                        dedup_joined = current.dedup_joined,
                        fetch_failures = current.fetch_failures,
                        incomplete_results = current.incomplete_results,
                        sessions_succeeded = current.sessions_succeeded,
                        sessions_exhausted = current.sessions_exhausted,
                        stale_discards = current.stale_discards,
                        "fetch metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                    reports += 1;
                }
            }
        }
        reports
    })
}
