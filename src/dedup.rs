//! In-flight request de-duplication: one underlying fetch per key no matter
//! how many callers ask for it concurrently.

pub mod deduplicator;
pub mod executor;

pub use deduplicator::{DedupError, DedupFuture, Deduplicator};
pub use executor::DedupExecutor;
