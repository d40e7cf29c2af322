//! Scope entry and guaranteed clearing.

use std::future::Future;

use batchload_core::Scope;
use tokio::runtime::Handle;
use tracing::{debug_span, Instrument};

use crate::config::ScopeStrategy;

/// Clears its scope when dropped.
///
/// Dropping happens on normal completion, on early return, while unwinding
/// from a panic and when the owning future is cancelled.
#[derive(Debug)]
#[must_use = "the scope is cleared as soon as the guard is dropped"]
pub struct ScopeGuard {
    scope: Scope,
}

impl ScopeGuard {
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.scope.clear();
    }
}

/// Selects the scope for a unit of work according to `strategy`.
///
/// [`ScopeStrategy::Ambient`] joins the scope installed by an enclosing
/// scoped future and clears it before handing it out, so nothing from a
/// previous unit of work is visible. Without one, a thread's scope is only
/// used off the tokio runtime: runtime worker threads interleave unrelated
/// units of work, so each of those gets a fresh scope instead.
pub fn enter_scope(strategy: ScopeStrategy) -> Scope {
    match strategy {
        ScopeStrategy::Isolated => Scope::new(),
        ScopeStrategy::Ambient => {
            let scope = match Scope::installed() {
                Some(scope) => scope,
                None if Handle::try_current().is_ok() => return Scope::new(),
                None => Scope::current(),
            };
            scope.clear();
            scope
        }
    }
}

/// Runs `fut` as one unit of work and clears its scope afterwards.
///
/// The scope is current (see [`Scope::current`]) for every poll of `fut`.
pub async fn run_in_scope<F: Future>(strategy: ScopeStrategy, fut: F) -> F::Output {
    let scope = enter_scope(strategy);
    let _guard = ScopeGuard::new(scope.clone());
    scope
        .scoped(fut)
        .instrument(debug_span!("batch_scope", ?strategy))
        .await
}
