//! Deferred values: handles to items resolved by a future batch wave.
//!
//! # Lifecycle
//!
//! ```text
//! Unbound --batch()--> Bound(pending) --resolve()--> Resolved(cached)
//!                           ^                    |
//!                           +---- cache=false ---+  (purged and re-enqueued)
//! ```
//!
//! Binding registers the item as pending in its batch group. Resolving runs a
//! wave only when the item has not been loaded yet, so every deferred value
//! pending in the group at that moment is served by a single batch function
//! call.
//!
//! # Example
//!
//! ```rust,ignore
//! use batchload_core::{BindOptions, Scope};
//!
//! let scope = Scope::new();
//! let users: Vec<_> = [1, 2]
//!     .into_iter()
//!     .map(|id| {
//!         scope.defer(id).batch(
//!             |ids: Arc<[u64]>, loader, _context| async move {
//!                 for user in repo.find_many(&ids).await? {
//!                     loader.load(user.id, Some(user))?;
//!                 }
//!                 Ok::<_, BoxError>(())
//!             },
//!             BindOptions::default().with_key("users"),
//!         )
//!     })
//!     .collect::<Result<_, _>>()?;
//! let users = resolve_all(users).await?;
//! ```

use std::fmt;
use std::future::{Future, IntoFuture};
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::error::{BatchLoadResult, BoxError, UsageError};
use crate::group::{BatchGroup, BatchKey};
use crate::loader::{LoadMode, Loader};
use crate::scope::Scope;
use crate::wave::{self, BatchFn, ContextMap, WaveFn};

/// Options for [`DeferredValue::batch`].
pub struct BindOptions<V> {
    /// Keep the resolved value for the rest of the scope. When false, every
    /// `resolve()` purges the value and re-enqueues the item, so the next
    /// resolution runs a new wave.
    pub cache: bool,
    /// Value for items the batch function never loads. Each item gets its own
    /// clone.
    pub default_value: V,
    /// Explicit batch group. Defaults to the identity of the batch function type.
    pub key: Option<BatchKey>,
    pub mode: LoadMode<V>,
}

impl<V: Default> Default for BindOptions<V> {
    fn default() -> Self {
        Self::new(V::default())
    }
}

impl<V> BindOptions<V> {
    /// Creates options with the given default value and caching enabled.
    pub fn new(default_value: V) -> Self {
        Self {
            cache: true,
            default_value,
            key: None,
            mode: LoadMode::Overwrite,
        }
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_default(mut self, default_value: V) -> Self {
        self.default_value = default_value;
        self
    }

    /// Batches with every deferred value bound under the same key.
    pub fn with_key(mut self, key: impl Into<BatchKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_mode(mut self, mode: LoadMode<V>) -> Self {
        self.mode = mode;
        self
    }

    /// Folds literal loader values into the current value with `fold`.
    pub fn accumulate<F>(self, fold: F) -> Self
    where
        F: Fn(V, V) -> V + Send + Sync + 'static,
    {
        self.with_mode(LoadMode::accumulate(fold))
    }
}

impl<V: Clone> Clone for BindOptions<V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache,
            default_value: self.default_value.clone(),
            key: self.key.clone(),
            mode: self.mode.clone(),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for BindOptions<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindOptions")
            .field("cache", &self.cache)
            .field("default_value", &self.default_value)
            .field("key", &self.key)
            .field("mode", &self.mode)
            .finish()
    }
}

struct Binding<K, V, C> {
    batch_fn: WaveFn<K, V, C>,
    group: Arc<BatchGroup<K, V, C>>,
    options: BindOptions<V>,
}

impl<K, V: Clone, C> Clone for Binding<K, V, C> {
    fn clone(&self) -> Self {
        Self {
            batch_fn: Arc::clone(&self.batch_fn),
            group: Arc::clone(&self.group),
            options: self.options.clone(),
        }
    }
}

/// A handle to `item`, whose value is computed by a batch wave.
pub struct DeferredValue<K, V, C = ()> {
    item: K,
    scope: Scope,
    context: Option<C>,
    binding: Option<Binding<K, V, C>>,
    memo: Option<V>,
}

impl<K, V, C> DeferredValue<K, V, C> {
    pub(crate) fn new(scope: Scope, item: K) -> Self {
        Self {
            item,
            scope,
            context: None,
            binding: None,
            memo: None,
        }
    }

    pub fn item(&self) -> &K {
        &self.item
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Whether a batch function has been attached.
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Whether this handle holds a cached value, so `resolve()` does no work.
    pub fn is_resolved(&self) -> bool {
        self.memo.is_some()
    }

    /// The batch group this value was bound to.
    pub fn batch_key(&self) -> Option<&BatchKey> {
        self.binding.as_ref().map(|binding| binding.group.key())
    }
}

impl<K, V, C> DeferredValue<K, V, C>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    /// Attaches side data the batch function receives for this item.
    pub fn with_context(mut self, context: C) -> Self {
        match &self.binding {
            Some(binding) => binding.group.enqueue(self.item.clone(), Some(context)),
            None => self.context = Some(context),
        }
        self
    }

    /// Attaches `batch_fn` and registers the item as pending.
    ///
    /// Fails with [`UsageError::AlreadyBound`] if a batch function is already
    /// attached, and with [`UsageError::GroupTypeMismatch`] if the batch key is
    /// registered in this scope with different types.
    pub fn batch<F, Fut, E>(self, batch_fn: F, options: BindOptions<V>) -> BatchLoadResult<Self>
    where
        F: Fn(Arc<[K]>, Loader<K, V, C>, ContextMap<K, C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let key = options.key.clone().unwrap_or_else(BatchKey::of::<F>);
        self.bind(key, wave::from_closure(batch_fn), options)
    }

    /// Like [`batch`](Self::batch), for a batch function implemented as a type.
    pub fn batch_with<B>(self, batch_fn: B, options: BindOptions<V>) -> BatchLoadResult<Self>
    where
        B: BatchFn<K, V, C>,
    {
        let key = options.key.clone().unwrap_or_else(BatchKey::of::<B>);
        self.bind(key, wave::from_trait(batch_fn), options)
    }

    fn bind(
        mut self,
        key: BatchKey,
        batch_fn: WaveFn<K, V, C>,
        options: BindOptions<V>,
    ) -> BatchLoadResult<Self> {
        if self.binding.is_some() {
            return Err(UsageError::AlreadyBound.into());
        }

        let group = self.scope.store().group::<K, V, C>(key)?;
        let context = self.context.take();
        // Loaded items only go back into a wave to deliver new context
        if context.is_some() || !group.is_resolved(&self.item) {
            group.enqueue(self.item.clone(), context);
        }
        self.binding = Some(Binding {
            batch_fn,
            group,
            options,
        });
        Ok(self)
    }

    /// Returns the item's value, running a wave if it is not loaded yet.
    ///
    /// Errors from the batch function are returned unchanged and leave the
    /// wave's items pending, so calling `resolve()` again retries the wave.
    pub async fn resolve(&mut self) -> BatchLoadResult<V> {
        if let Some(value) = &self.memo {
            return Ok(value.clone());
        }
        let binding = self.binding.as_ref().ok_or(UsageError::NotBound)?;

        let value = wave::resolve_item(
            &binding.group,
            &self.item,
            &binding.batch_fn,
            &binding.options,
        )
        .await?;

        if binding.options.cache {
            self.memo = Some(value.clone());
        }
        Ok(value)
    }
}

impl<K, V, C> IntoFuture for DeferredValue<K, V, C>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    type Output = BatchLoadResult<V>;
    type IntoFuture = BoxFuture<'static, BatchLoadResult<V>>;

    fn into_future(mut self) -> Self::IntoFuture {
        async move { self.resolve().await }.boxed()
    }
}

impl<K: Clone, V: Clone, C: Clone> Clone for DeferredValue<K, V, C> {
    fn clone(&self) -> Self {
        Self {
            item: self.item.clone(),
            scope: self.scope.clone(),
            context: self.context.clone(),
            binding: self.binding.clone(),
            memo: self.memo.clone(),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, C> fmt::Debug for DeferredValue<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredValue")
            .field("item", &self.item)
            .field("key", &self.batch_key())
            .field("memo", &self.memo)
            .finish()
    }
}
