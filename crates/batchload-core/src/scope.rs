//! Unit-of-work scopes.
//!
//! A [`Scope`] owns the [`ScopeStore`] shared by every deferred value created
//! within one logical unit of work (a request, a job, a thread). The store is
//! created lazily on first touch and only ever discarded by an explicit
//! [`Scope::clear`], so cached values never outlive the unit of work that
//! produced them and never leak into the next one.
//!
//! # Propagation
//!
//! Scopes are passed explicitly ([`Scope::defer`]) or installed for a future
//! with [`Scope::scoped`], which makes them visible to [`Scope::current`] for
//! the duration of that future. Outside of any scoped future, `current()` falls
//! back to a per-thread scope.
//!
//! ```rust,ignore
//! let scope = Scope::new();
//! let response = scope.clone().scoped(handle_request(request)).await;
//! scope.clear();
//! ```

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::deferred::DeferredValue;
use crate::error::{BatchLoadResult, UsageError};
use crate::group::{BatchGroup, BatchKey};

tokio::task_local! {
    static CURRENT_SCOPE: Scope;
}

thread_local! {
    static THREAD_SCOPE: Scope = Scope::new();
}

/// Registry of batch groups for one unit of work.
#[derive(Default)]
pub struct ScopeStore {
    groups: DashMap<BatchKey, Arc<dyn Any + Send + Sync>>,
}

impl ScopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the group registered under `key`, creating it if absent.
    ///
    /// Fails if `key` is already registered with different `K`/`V`/`C` types.
    pub fn group<K, V, C>(&self, key: BatchKey) -> BatchLoadResult<Arc<BatchGroup<K, V, C>>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        C: Send + Sync + 'static,
    {
        match self.groups.entry(key) {
            Entry::Occupied(entry) => Arc::clone(entry.get())
                .downcast::<BatchGroup<K, V, C>>()
                .map_err(|_| {
                    UsageError::GroupTypeMismatch {
                        key: entry.key().to_string(),
                    }
                    .into()
                }),
            Entry::Vacant(entry) => {
                let group = BatchGroup::new_shared(entry.key().clone());
                entry.insert(Arc::clone(&group) as Arc<dyn Any + Send + Sync>);
                Ok(group)
            }
        }
    }

    /// Number of batch groups touched in this unit of work.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn contains_group(&self, key: &BatchKey) -> bool {
        self.groups.contains_key(key)
    }
}

impl fmt::Debug for ScopeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeStore")
            .field("groups", &self.groups.len())
            .finish()
    }
}

/// Handle to the state of one unit of work. Clones share the same state.
#[derive(Clone, Default)]
pub struct Scope {
    store: Arc<Mutex<Option<Arc<ScopeStore>>>>,
}

impl Scope {
    /// Creates a new, independent scope. Its store is created on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the scope of the calling unit of work.
    ///
    /// This is the scope installed by [`Scope::scoped`] when called from inside
    /// such a future, otherwise the calling thread's scope.
    pub fn current() -> Self {
        CURRENT_SCOPE
            .try_with(Scope::clone)
            .unwrap_or_else(|_| THREAD_SCOPE.with(Scope::clone))
    }

    /// The scope installed by an enclosing [`Scope::scoped`] future, if any.
    pub fn installed() -> Option<Self> {
        CURRENT_SCOPE.try_with(Scope::clone).ok()
    }

    /// Runs `fut` with `self` as the current scope.
    pub async fn scoped<F: Future>(self, fut: F) -> F::Output {
        CURRENT_SCOPE.scope(self, fut).await
    }

    /// Returns the store, creating it if this scope has none.
    pub fn store(&self) -> Arc<ScopeStore> {
        let mut store = self.lock();
        Arc::clone(store.get_or_insert_with(|| Arc::new(ScopeStore::new())))
    }

    /// Whether a store currently exists for this scope.
    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Discards the store and everything cached in it.
    ///
    /// Deferred values bound before the clear keep working against the state
    /// they were bound to; values created afterwards start from a fresh store.
    pub fn clear(&self) {
        if let Some(store) = self.lock().take() {
            debug!(groups = store.group_count(), "scope cleared");
        }
    }

    /// Whether `self` and `other` are handles to the same scope.
    pub fn same_scope(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }

    /// Creates an unbound deferred value for `item` in this scope.
    pub fn defer<K, V, C>(&self, item: K) -> DeferredValue<K, V, C> {
        DeferredValue::new(self.clone(), item)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<ScopeStore>>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Returns the scope of the calling unit of work. See [`Scope::current`].
pub fn current_scope() -> Scope {
    Scope::current()
}

/// Ensures the current scope has a store and returns it.
pub fn open_scope() -> Scope {
    let scope = Scope::current();
    scope.store();
    scope
}

/// Clears the current scope.
pub fn clear_scope() {
    Scope::current().clear();
}

/// Creates an unbound deferred value for `item` in the current scope.
pub fn defer<K, V, C>(item: K) -> DeferredValue<K, V, C> {
    Scope::current().defer(item)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_is_created_lazily() {
        let scope = Scope::new();

        assert!(!scope.is_open());
        let store = scope.store();

        assert!(scope.is_open());
        assert!(Arc::ptr_eq(&store, &scope.store()));
    }

    #[test]
    fn test_clear_discards_store() {
        let scope = Scope::new();
        let before = scope.store();
        before
            .group::<u32, u32, ()>(BatchKey::named("users"))
            .unwrap()
            .record(1, 10);

        scope.clear();

        assert!(!scope.is_open());
        let after = scope.store();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.group_count(), 0);
    }

    #[test]
    fn test_group_is_shared_by_key() {
        let store = ScopeStore::new();

        let first = store.group::<u32, String, ()>(BatchKey::named("users")).unwrap();
        let second = store.group::<u32, String, ()>(BatchKey::named("users")).unwrap();
        let other = store.group::<u32, String, ()>(BatchKey::named("posts")).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(store.group_count(), 2);
    }

    #[test]
    fn test_key_reused_with_other_types_is_usage_error() {
        let store = ScopeStore::new();
        store.group::<u32, String, ()>(BatchKey::named("users")).unwrap();

        let err = store
            .group::<String, String, ()>(BatchKey::named("users"))
            .unwrap_err();

        assert!(matches!(
            err.as_usage(),
            Some(UsageError::GroupTypeMismatch { key }) if key == "users"
        ));
    }

    #[test]
    fn test_clones_share_state() {
        let scope = Scope::new();
        let clone = scope.clone();

        clone.store();

        assert!(scope.is_open());
        assert!(scope.same_scope(&clone));
        assert!(!scope.same_scope(&Scope::new()));
    }

    #[tokio::test]
    async fn test_scoped_future_sees_its_scope() {
        let scope = Scope::new();
        let expected = scope.clone();

        let seen = scope.scoped(async { Scope::current() }).await;

        assert!(seen.same_scope(&expected));
        assert!(!Scope::current().same_scope(&expected));
    }

    #[tokio::test]
    async fn test_nested_scopes_restore_outer_scope() {
        let outer = Scope::new();
        let inner = Scope::new();
        let (outer_check, inner_check) = (outer.clone(), inner.clone());

        let (in_inner, after_inner) = outer
            .scoped(async move {
                let in_inner = inner.scoped(async { Scope::current() }).await;
                (in_inner, Scope::current())
            })
            .await;

        assert!(in_inner.same_scope(&inner_check));
        assert!(after_inner.same_scope(&outer_check));
    }

    #[tokio::test]
    async fn test_installed_only_inside_scoped_future() {
        let scope = Scope::new();
        let expected = scope.clone();

        let inside = scope.scoped(async { Scope::installed() }).await;

        assert!(inside.is_some_and(|seen| seen.same_scope(&expected)));
        assert!(Scope::installed().is_none());
    }

    #[test]
    fn test_thread_scope_open_and_clear() {
        std::thread::spawn(|| {
            let scope = open_scope();
            assert!(scope.is_open());
            assert!(current_scope().same_scope(&scope));

            clear_scope();

            assert!(!current_scope().is_open());
        })
        .join()
        .unwrap();
    }
}
