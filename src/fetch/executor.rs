use super::key::FetchRequest;
use anyhow::Result;
use core::future::Future;
use core::pin::Pin;
use serde_json::Value;
use std::sync::Arc;

pub type FetchFuture<T = Value> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'static>>;

/// The application's data executor (a GraphQL-style client in a storefront).
///
/// Implementations own transport and wire format; callers only see a JSON
/// payload or an error.
pub trait FetchExecutor: Send + Sync + 'static {
    fn execute(&self, request: FetchRequest) -> FetchFuture;
}

impl<E: FetchExecutor + ?Sized> FetchExecutor for Arc<E> {
    fn execute(&self, request: FetchRequest) -> FetchFuture {
        (**self).execute(request)
    }
}
