use super::deduplicator::Deduplicator;
use crate::fetch::{FetchExecutor, FetchFuture, FetchRequest};
use crate::runtime::telemetry::Telemetry;
use serde_json::Value;
use std::sync::Arc;

/// Executor adapter that routes every request through a [`Deduplicator`],
/// keyed by [`FetchRequest::key`].
pub struct DedupExecutor<E> {
    executor: Arc<E>,
    dedup: Deduplicator<Value>,
}

impl<E> Clone for DedupExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            dedup: self.dedup.clone(),
        }
    }
}

impl<E: FetchExecutor> DedupExecutor<E> {
    pub fn new(executor: E) -> Self {
        Self::with_deduplicator(Arc::new(executor), Deduplicator::new())
    }

    pub fn with_telemetry(executor: E, telemetry: Arc<Telemetry>) -> Self {
        Self::with_deduplicator(Arc::new(executor), Deduplicator::with_telemetry(telemetry))
    }

    pub fn with_deduplicator(executor: Arc<E>, dedup: Deduplicator<Value>) -> Self {
        Self { executor, dedup }
    }

    pub fn deduplicator(&self) -> &Deduplicator<Value> {
        &self.dedup
    }
}

impl<E: FetchExecutor> FetchExecutor for DedupExecutor<E> {
    fn execute(&self, request: FetchRequest) -> FetchFuture {
        let executor = Arc::clone(&self.executor);
        let key = request.key();
        let outcome = self
            .dedup
            .run(key, move || executor.execute(request));
        Box::pin(async move { outcome.await.map_err(anyhow::Error::from) })
    }
}
