//! Wave execution: one batch function run over a pending snapshot.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, debug_span, Instrument};

use crate::deferred::BindOptions;
use crate::error::{BatchLoadError, BatchLoadResult, BoxError};
use crate::group::{BatchGroup, Claim};
use crate::loader::{LoadMode, Loader};

tokio::task_local! {
    /// Waves whose batch function is running further up this call chain.
    static ACTIVE_WAVES: Vec<u64>;
}

/// Per-item context handed to a batch function.
pub type ContextMap<K, C> = HashMap<K, C>;

/// A batch function implemented as a type rather than a closure.
///
/// Receives the pending items of one wave (read-only), the wave's loader and
/// the context entries of those items.
#[async_trait]
pub trait BatchFn<K, V, C = ()>: Send + Sync + 'static {
    async fn load(
        &self,
        items: Arc<[K]>,
        loader: Loader<K, V, C>,
        context: ContextMap<K, C>,
    ) -> Result<(), BoxError>;
}

/// Type-erased batch function stored by a binding.
pub(crate) type WaveFn<K, V, C> = Arc<
    dyn Fn(Arc<[K]>, Loader<K, V, C>, ContextMap<K, C>) -> BoxFuture<'static, Result<(), BoxError>>
        + Send
        + Sync,
>;

pub(crate) fn from_closure<K, V, C, F, Fut, E>(batch_fn: F) -> WaveFn<K, V, C>
where
    K: 'static,
    V: 'static,
    C: 'static,
    F: Fn(Arc<[K]>, Loader<K, V, C>, ContextMap<K, C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    Arc::new(
        move |items: Arc<[K]>, loader: Loader<K, V, C>, context: ContextMap<K, C>| {
            let fut = batch_fn(items, loader, context);
            async move { fut.await.map_err(|err| -> BoxError { err.into() }) }.boxed()
        },
    )
}

pub(crate) fn from_trait<K, V, C, B>(batch_fn: B) -> WaveFn<K, V, C>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Send + Sync + 'static,
    B: BatchFn<K, V, C>,
{
    let batch_fn = Arc::new(batch_fn);
    Arc::new(
        move |items: Arc<[K]>, loader: Loader<K, V, C>, context: ContextMap<K, C>| {
            let batch_fn = Arc::clone(&batch_fn);
            async move { batch_fn.load(items, loader, context).await }.boxed()
        },
    )
}

static NEXT_WAVE: AtomicU64 = AtomicU64::new(1);

fn next_wave_id() -> u64 {
    NEXT_WAVE.fetch_add(1, Ordering::Relaxed)
}

/// Resolves `item` in `group`, running a wave first if it is not loaded yet.
///
/// A wave takes every pending item no other wave is running, so concurrent
/// resolvers of those items follow it instead of starting their own. Only
/// resolvers outside any batch function wait; a batch function never blocks
/// on another wave:
///
/// - an item of a wave running further up the same call chain resolves to
///   what that wave has loaded so far, or the default;
/// - an item owned by an unrelated wave is loaded again by a wave of its own.
pub(crate) async fn resolve_item<K, V, C>(
    group: &Arc<BatchGroup<K, V, C>>,
    item: &K,
    batch_fn: &WaveFn<K, V, C>,
    options: &BindOptions<V>,
) -> BatchLoadResult<V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    let active = ACTIVE_WAVES.try_with(Vec::clone).unwrap_or_default();
    loop {
        let wave = next_wave_id();
        match group.claim(item, wave) {
            Claim::Resolved => break,
            Claim::Lead(items) => {
                let claim = WaveClaim::new(group, items, wave);
                run_wave(claim, batch_fn, &options.default_value, &options.mode).await?;
                break;
            }
            Claim::Follow { wave: owner, .. } if active.contains(&owner) => {
                return Ok(group.resolved_value(item, &options.default_value));
            }
            Claim::Follow { mut done, .. } if active.is_empty() => {
                // Closed once the owning wave releases its items
                let _ = done.recv().await;
            }
            Claim::Follow { .. } => {
                let claim = WaveClaim::new(group, Arc::from(vec![item.clone()]), wave);
                run_wave(claim, batch_fn, &options.default_value, &options.mode).await?;
                break;
            }
        }
    }

    let value = group.resolved_value(item, &options.default_value);
    if !options.cache {
        group.invalidate(item);
        group.enqueue(item.clone(), None);
    }
    Ok(value)
}

/// Items taken by one wave. Dropping the claim hands them back to the group,
/// consumed only if [`WaveClaim::consume`] was called first.
struct WaveClaim<'a, K, V, C>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    group: &'a Arc<BatchGroup<K, V, C>>,
    items: Arc<[K]>,
    wave: u64,
    consumed: bool,
}

impl<'a, K, V, C> WaveClaim<'a, K, V, C>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn new(group: &'a Arc<BatchGroup<K, V, C>>, items: Arc<[K]>, wave: u64) -> Self {
        Self {
            group,
            items,
            wave,
            consumed: false,
        }
    }

    fn consume(mut self) {
        self.consumed = true;
    }
}

impl<K, V, C> Drop for WaveClaim<'_, K, V, C>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        self.group.release(&self.items, self.wave, self.consumed);
    }
}

/// Runs one wave over the claimed items.
///
/// On success every item left unresolved is filled with a copy of
/// `default_value`, then the items are consumed. On failure (or if the
/// resolving future is dropped) nothing is consumed, so the same items are
/// retried by the next wave.
async fn run_wave<K, V, C>(
    claim: WaveClaim<'_, K, V, C>,
    batch_fn: &WaveFn<K, V, C>,
    default_value: &V,
    mode: &LoadMode<V>,
) -> BatchLoadResult<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    let group = claim.group;
    let items = Arc::clone(&claim.items);
    let context = group.take_context(&items);
    let loader = Loader::new(Arc::clone(group), default_value.clone(), mode.clone());

    let mut active = ACTIVE_WAVES.try_with(Vec::clone).unwrap_or_default();
    active.push(claim.wave);

    let span = debug_span!("batch_wave", group = %group.key(), items = items.len());
    let outcome = ACTIVE_WAVES
        .scope(active, batch_fn(Arc::clone(&items), loader.clone(), context))
        .instrument(span)
        .await;

    if let Some(misuse) = loader.finish() {
        return Err(misuse.into());
    }
    outcome.map_err(|err| BatchLoadError::from_batch_fn(group.key().to_string(), err))?;

    let mut filled = 0usize;
    for item in items.iter() {
        if !group.is_resolved(item) {
            group.record(item.clone(), default_value.clone());
            filled += 1;
        }
    }
    claim.consume();

    debug!(
        group = %group.key(),
        items = items.len(),
        filled,
        still_pending = group.pending_len(),
        "batch wave completed"
    );
    Ok(())
}
