//! Tower adapter: run an inner service behind a partitioner.
//!
//! Every request is routed by key to a lane, and the inner service is called
//! from that lane. Requests with the same key therefore reach the inner
//! service one at a time, in the order they were called.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::{Layer, Service, ServiceExt};

use crate::error::PartitionError;
use crate::partitioner::TypedPartitioner;

// ---------------------------------------------------------------------------
// PartitionLayer
// ---------------------------------------------------------------------------

/// Tower layer that wraps services with keyed, per-lane sequential execution.
pub struct PartitionLayer<T> {
    front: TypedPartitioner<T>,
}

impl<T> PartitionLayer<T> {
    #[must_use]
    pub fn new(front: TypedPartitioner<T>) -> Self {
        Self { front }
    }
}

impl<T> Clone for PartitionLayer<T> {
    fn clone(&self) -> Self {
        Self {
            front: self.front.clone(),
        }
    }
}

impl<S, T> Layer<S> for PartitionLayer<T> {
    type Service = PartitionService<S, T>;

    fn layer(&self, inner: S) -> Self::Service {
        PartitionService {
            inner,
            front: self.front.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// PartitionService
// ---------------------------------------------------------------------------

/// Service wrapper that sends each request through a [`TypedPartitioner`].
///
/// The inner service is cloned per request and driven with `oneshot` inside
/// the lane. Inner errors become `PartitionError::WorkItemFailure`; routing
/// errors (`InvalidKey`, `PartitionClosed`) are returned as-is.
pub struct PartitionService<S, T> {
    inner: S,
    front: TypedPartitioner<T>,
}

impl<S: Clone, T> Clone for PartitionService<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            front: self.front.clone(),
        }
    }
}

impl<S, T> Service<T> for PartitionService<S, T>
where
    T: Send + 'static,
    S: Service<T> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Into<anyhow::Error> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = PartitionError;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, PartitionError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Lanes queue without bound; readiness of the inner service is
        // awaited inside the lane by `oneshot`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: T) -> Self::Future {
        let inner = self.inner.clone();
        let sent = self.front.send(request, move |request| inner.oneshot(request));
        Box::pin(async move { sent?.await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
