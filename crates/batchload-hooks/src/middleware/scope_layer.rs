//! Scope middleware: every call runs as its own unit of work.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tower::{Layer, Service};

use crate::config::{ScopeSettings, ScopeStrategy};
use crate::guard::run_in_scope;

/// Layer that runs each call of the wrapped service inside a batch scope.
///
/// The scope is cleared when the call's future completes, fails, panics or is
/// dropped, so deferred values never share cached state across calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeLayer {
    strategy: ScopeStrategy,
}

impl ScopeLayer {
    /// A fresh scope per call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the enclosing scope, clearing it before and after each call.
    ///
    /// See [`enter_scope`](crate::guard::enter_scope) for where that scope comes from.
    pub fn ambient() -> Self {
        Self {
            strategy: ScopeStrategy::Ambient,
        }
    }

    pub fn with_strategy(strategy: ScopeStrategy) -> Self {
        Self { strategy }
    }

    pub fn from_settings(settings: &ScopeSettings) -> Self {
        Self::with_strategy(settings.strategy)
    }

    pub fn strategy(&self) -> ScopeStrategy {
        self.strategy
    }
}

impl<S> Layer<S> for ScopeLayer {
    type Service = ScopeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ScopeService {
            inner,
            strategy: self.strategy,
        }
    }
}

/// Service wrapping each call in its own scope.
#[derive(Debug, Clone)]
pub struct ScopeService<S> {
    inner: S,
    strategy: ScopeStrategy,
}

impl<S, Request> Service<Request> for ScopeService<S>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Future: Send,
    Request: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // Keep the instance that was driven to readiness
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let strategy = self.strategy;

        Box::pin(run_in_scope(strategy, async move { inner.call(request).await }))
    }
}
