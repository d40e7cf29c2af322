//! Background job runner.
//!
//! A job is a unit of work just like a request: deferred values created while
//! it runs share one scope, and that scope is cleared once the job is done,
//! whether it succeeded, failed or panicked.
//!
//! ```rust,ignore
//! let runner = JobRunner::from_settings(&config.scope);
//! runner.run(|| send_digest_emails(batch_id)).await?;
//! ```

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::{ScopeSettings, ScopeStrategy};
use crate::guard::run_in_scope;

/// Runs jobs, each inside its own batch scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobRunner {
    strategy: ScopeStrategy,
}

impl JobRunner {
    pub fn new() -> Self {
        Self::default()
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

    /// Runs `job` to completion and returns its output.
    pub async fn run<F, Fut>(&self, job: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let output = run_in_scope(self.strategy, async move { job().await }).await;
        debug!(strategy = ?self.strategy, "job finished");
        output
    }

    /// Runs `job` on a new tokio task.
    ///
    /// A panic inside the job surfaces as a panicked [`JoinHandle`]; the
    /// job's scope is cleared either way.
    pub fn spawn<F, Fut>(&self, job: F) -> JoinHandle<Fut::Output>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let strategy = self.strategy;
        tokio::spawn(run_in_scope(strategy, async move { job().await }))
    }
}
