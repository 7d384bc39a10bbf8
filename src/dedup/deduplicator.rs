use crate::fetch::FetchKey;
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;

/// Settled result observed by every caller attached to one in-flight fetch.
pub type DedupFuture<T> = Shared<BoxFuture<'static, Result<T, DedupError>>>;

/// Failure shared verbatim with every caller of one in-flight fetch.
#[derive(Debug, Clone, Error)]
pub enum DedupError {
    #[error("{0:#}")]
    Failed(Arc<anyhow::Error>),
    #[error("fetch {key} panicked before settling")]
    Panicked { key: FetchKey },
    #[error("fetch {key} was aborted before settling")]
    Aborted { key: FetchKey },
}

impl DedupError {
    /// Underlying operation error, if the operation itself returned one.
    pub fn source_error(&self) -> Option<&anyhow::Error> {
        match self {
            DedupError::Failed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

struct PendingRequest<T> {
    id: u64,
    outcome: DedupFuture<T>,
}

struct DedupInner<T> {
    pending: Mutex<HashMap<FetchKey, PendingRequest<T>>>,
    next_id: AtomicU64,
    telemetry: Arc<Telemetry>,
}

/// Collapses concurrent identical fetches into one underlying call.
///
/// Clones share a single registration table; separately constructed
/// deduplicators never see each other's entries.
pub struct Deduplicator<T> {
    inner: Arc<DedupInner<T>>,
}

impl<T> Clone for Deduplicator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_telemetry(Arc::new(Telemetry::default()))
    }

    pub fn with_telemetry(telemetry: Arc<Telemetry>) -> Self {
        Self {
            inner: Arc::new(DedupInner {
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                telemetry,
            }),
        }
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.inner.telemetry.clone()
    }

    /// Returns the in-flight result for `key`, starting `operation` only when
    /// nothing is pending under that key.
    ///
    /// Registration happens before this method returns, so callers racing on
    /// the same key attach to the same fetch even if none of them has polled
    /// yet. The operation runs on its own task: the entry is removed when it
    /// settles whether or not anyone is still waiting. Must be called from
    /// within a tokio runtime.
    pub fn run<F, Fut>(&self, key: FetchKey, operation: F) -> DedupFuture<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut pending = self.inner.pending.lock().expect("dedup table mutex poisoned");

        if let Some(existing) = pending.get(&key) {
            self.inner.telemetry.record_dedup_joined();
            tracing::trace!(key = %key, request_id = existing.id, "joining in-flight fetch");
            return existing.outcome.clone();
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Registration {
            table: Arc::downgrade(&self.inner),
            key: key.clone(),
            id,
        };

        // The operation is invoked inside the task so an error or panic raised
        // while starting it still settles through the registered entry.
        let handle = tokio::spawn(async move {
            let _registration = registration;
            operation().await
        });

        let settled_key = key.clone();
        let outcome = async move {
            match handle.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(DedupError::Failed(Arc::new(err))),
                Err(join) if join.is_panic() => Err(DedupError::Panicked { key: settled_key }),
                Err(_) => Err(DedupError::Aborted { key: settled_key }),
            }
        }
        .boxed()
        .shared();

        pending.insert(
            key.clone(),
            PendingRequest {
                id,
                outcome: outcome.clone(),
            },
        );
        self.inner.telemetry.record_dedup_started();
        tracing::trace!(key = %key, request_id = id, "started deduplicated fetch");

        outcome
    }

    /// Number of keys with a fetch currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner
            .pending
            .lock()
            .expect("dedup table mutex poisoned")
            .len()
    }

    pub fn is_pending(&self, key: &FetchKey) -> bool {
        self.inner
            .pending
            .lock()
            .expect("dedup table mutex poisoned")
            .contains_key(key)
    }
}

/// Removes its table entry when the owning task finishes, panics, or is
/// aborted. Only the entry with the matching id is removed.
struct Registration<T> {
    table: Weak<DedupInner<T>>,
    key: FetchKey,
    id: u64,
}

impl<T> Drop for Registration<T> {
    fn drop(&mut self) {
        let Some(inner) = self.table.upgrade() else {
            return;
        };
        let mut pending = match inner.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if pending
            .get(&self.key)
            .is_some_and(|entry| entry.id == self.id)
        {
            pending.remove(&self.key);
            tracing::trace!(key = %self.key, request_id = self.id, "deduplicated fetch settled");
        }
    }
}
