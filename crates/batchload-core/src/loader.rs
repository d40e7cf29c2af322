//! The loader callback handed to batch functions.
//!
//! A [`Loader`] is created for a single wave. Batch functions call it once per
//! item (or several times per item when accumulating) to record resolved values.
//! Clones share state, so the loader can be moved into spawned tasks that run
//! concurrently; every call takes the wave's mutex for its read-modify-write so
//! accumulated updates are never lost. Accumulators and folds run under that
//! mutex and must not call the loader themselves; such calls fail with
//! [`UsageError::ReentrantLoad`] and abort the wave.

use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{BatchLoadError, BatchLoadResult, UsageError};
use crate::group::BatchGroup;

/// Accumulator applied to an item's current value.
pub type Accumulator<V> = Box<dyn FnOnce(V) -> V + Send>;

/// Fold used by [`LoadMode::Accumulate`]: `(current, incoming) -> next`.
pub type FoldFn<V> = Arc<dyn Fn(V, V) -> V + Send + Sync>;

/// How literal values passed to the loader are recorded.
#[derive(Clone)]
pub enum LoadMode<V> {
    /// Each value replaces the item's current value.
    Overwrite,
    /// Each value is folded into the item's current value.
    Accumulate(FoldFn<V>),
}

impl<V> Default for LoadMode<V> {
    fn default() -> Self {
        LoadMode::Overwrite
    }
}

impl<V> LoadMode<V> {
    /// Accumulate literal values with `fold(current, incoming)`.
    pub fn accumulate<F>(fold: F) -> Self
    where
        F: Fn(V, V) -> V + Send + Sync + 'static,
    {
        LoadMode::Accumulate(Arc::new(fold))
    }
}

impl<V> fmt::Debug for LoadMode<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Overwrite => f.write_str("Overwrite"),
            LoadMode::Accumulate(_) => f.write_str("Accumulate(..)"),
        }
    }
}

/// Arguments for a single [`Loader::call`].
///
/// Exactly one of `value` and `accumulator` must be set.
pub struct LoadArgs<V> {
    value: Option<V>,
    accumulator: Option<Accumulator<V>>,
}

impl<V> Default for LoadArgs<V> {
    fn default() -> Self {
        Self {
            value: None,
            accumulator: None,
        }
    }
}

impl<V> LoadArgs<V> {
    /// Record a literal value.
    pub fn value(value: V) -> Self {
        Self::default().with_value(value)
    }

    /// Fold into the current value with `f`.
    pub fn accumulate<F>(f: F) -> Self
    where
        F: FnOnce(V) -> V + Send + 'static,
    {
        Self::default().with_accumulator(f)
    }

    /// Sets the literal value.
    pub fn with_value(mut self, value: V) -> Self {
        self.value = Some(value);
        self
    }

    /// Sets the accumulator.
    pub fn with_accumulator<F>(mut self, f: F) -> Self
    where
        F: FnOnce(V) -> V + Send + 'static,
    {
        self.accumulator = Some(Box::new(f));
        self
    }
}

impl<V> fmt::Debug for LoadArgs<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadArgs")
            .field("value", &self.value.is_some())
            .field("accumulator", &self.accumulator.is_some())
            .finish()
    }
}

enum Update<V> {
    Set(V),
    Fold(FoldFn<V>, V),
    Apply(Accumulator<V>),
}

thread_local! {
    /// Loader slots whose accumulator is running on this thread, and whether
    /// it called back into the loader.
    static ACCUMULATING: RefCell<Vec<(usize, bool)>> = const { RefCell::new(Vec::new()) };
}

/// Marks a slot as running user fold code on this thread until dropped.
struct Accumulating {
    slot: usize,
}

impl Accumulating {
    fn enter(slot: usize) -> Self {
        ACCUMULATING.with(|stack| stack.borrow_mut().push((slot, false)));
        Self { slot }
    }

    /// Whether the loader was called while this marker was active.
    fn reentered(&self) -> bool {
        ACCUMULATING.with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find(|(slot, _)| *slot == self.slot)
                .is_some_and(|(_, reentered)| *reentered)
        })
    }

    /// Flags `slot` if one of its accumulators is running on this thread.
    fn flag(slot: usize) -> bool {
        ACCUMULATING.with(|stack| {
            match stack.borrow_mut().iter_mut().rev().find(|(id, _)| *id == slot) {
                Some(entry) => {
                    entry.1 = true;
                    true
                }
                None => false,
            }
        })
    }
}

impl Drop for Accumulating {
    fn drop(&mut self) {
        ACCUMULATING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[derive(Default)]
struct WaveSlot {
    finished: bool,
    misuse: Option<UsageError>,
}

/// Loader callback for one wave of a batch group.
pub struct Loader<K, V, C = ()> {
    group: Arc<BatchGroup<K, V, C>>,
    default_value: V,
    mode: LoadMode<V>,
    slot: Arc<Mutex<WaveSlot>>,
}

impl<K, V: Clone, C> Clone for Loader<K, V, C> {
    fn clone(&self) -> Self {
        Self {
            group: Arc::clone(&self.group),
            default_value: self.default_value.clone(),
            mode: self.mode.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<K, V, C> fmt::Debug for Loader<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("group", self.group.key())
            .field("mode", &self.mode)
            .finish()
    }
}

impl<K, V, C> Loader<K, V, C>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    pub(crate) fn new(group: Arc<BatchGroup<K, V, C>>, default_value: V, mode: LoadMode<V>) -> Self {
        Self {
            group,
            default_value,
            mode,
            slot: Arc::new(Mutex::new(WaveSlot::default())),
        }
    }

    /// Records a value (or applies an accumulator) for `item`.
    ///
    /// Fails with [`UsageError::LoaderArguments`] unless exactly one of a value
    /// and an accumulator is given.
    pub fn call(&self, item: K, args: LoadArgs<V>) -> BatchLoadResult<()> {
        let update = match (args.value, args.accumulator) {
            (Some(_), Some(_)) => {
                return self.misuse(UsageError::LoaderArguments {
                    message: "pass a value or an accumulator, not both".to_string(),
                })
            }
            (None, None) => {
                return self.misuse(UsageError::LoaderArguments {
                    message: "pass a value or an accumulator".to_string(),
                })
            }
            (Some(value), None) => match &self.mode {
                LoadMode::Overwrite => Update::Set(value),
                LoadMode::Accumulate(fold) => Update::Fold(Arc::clone(fold), value),
            },
            (None, Some(accumulator)) => Update::Apply(accumulator),
        };
        self.apply(item, update)
    }

    /// Records `value` for `item`, honoring the binding's [`LoadMode`].
    pub fn load(&self, item: K, value: V) -> BatchLoadResult<()> {
        self.call(item, LoadArgs::value(value))
    }

    /// Replaces `item`'s current value (or the default) with `f(current)`.
    pub fn update<F>(&self, item: K, f: F) -> BatchLoadResult<()>
    where
        F: FnOnce(V) -> V + Send + 'static,
    {
        self.call(item, LoadArgs::accumulate(f))
    }

    fn apply(&self, item: K, update: Update<V>) -> BatchLoadResult<()> {
        let slot_id = Arc::as_ptr(&self.slot) as usize;
        if Accumulating::flag(slot_id) {
            return Err(self.reentrant().into());
        }

        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.finished {
            return Err(UsageError::WaveFinished {
                key: self.group.key().to_string(),
            }
            .into());
        }

        let next = match update {
            Update::Set(value) => value,
            Update::Fold(fold, value) => {
                let marker = Accumulating::enter(slot_id);
                let next = fold(self.current(&item), value);
                if marker.reentered() {
                    slot.misuse.get_or_insert_with(|| self.reentrant());
                }
                next
            }
            Update::Apply(accumulator) => {
                let marker = Accumulating::enter(slot_id);
                let next = accumulator(self.current(&item));
                if marker.reentered() {
                    slot.misuse.get_or_insert_with(|| self.reentrant());
                }
                next
            }
        };
        self.group.record(item, next);
        Ok(())
    }

    fn reentrant(&self) -> UsageError {
        UsageError::ReentrantLoad {
            key: self.group.key().to_string(),
        }
    }

    fn current(&self, item: &K) -> V {
        self.group.resolved_value(item, &self.default_value)
    }

    fn misuse(&self, err: UsageError) -> BatchLoadResult<()> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.misuse.is_none() {
            slot.misuse = Some(err.clone());
        }
        Err(BatchLoadError::Usage(err))
    }

    /// Closes the wave and returns the first recorded misuse, if any.
    pub(crate) fn finish(&self) -> Option<UsageError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.finished = true;
        slot.misuse.take()
    }
}
