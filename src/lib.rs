pub mod dedup;
pub mod fetch;
pub mod polling;
pub mod runtime;

pub use dedup::{DedupError, DedupExecutor, DedupFuture, Deduplicator};
pub use fetch::{FetchExecutor, FetchFuture, FetchKey, FetchRequest};
pub use polling::{
    AttemptOutcome, Completion, DelayPolicy, NonEmptyAt, PollError, PollEvent, PollState,
    PollingCoordinator, RetrySession,
};
pub use runtime::config::{CoordinatorConfig, CoordinatorConfigBuilder, CoordinatorConfigParams};
pub use runtime::telemetry::{init_tracing, spawn_metrics_reporter, Telemetry, TelemetrySnapshot};
