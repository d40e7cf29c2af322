//! Batch groups: per-key pending items and resolved values.
//!
//! A [`BatchGroup`] is the state shared by every deferred value bound under the
//! same [`BatchKey`] within one scope. It holds no batching logic of its own
//! beyond set/map maintenance; waves are driven by [`crate::wave`].
//!
//! Items taken by a running wave are *in flight* until that wave releases
//! them. A new wave never takes an in-flight item, so nested waves see only
//! what was enqueued after the running ones started.

use std::any::TypeId;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use indexmap::IndexSet;
use tokio::sync::broadcast;
use tracing::trace;

/// Identity used to group deferred values into the same wave.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum BatchKey {
    /// Caller-supplied name. Call sites that must share a batch use this.
    Named(Cow<'static, str>),
    /// Derived from the batch function's type; each closure literal has its own.
    Function {
        type_id: TypeId,
        type_name: &'static str,
    },
}

impl BatchKey {
    /// Creates an explicit, named key.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        BatchKey::Named(name.into())
    }

    /// Creates the fallback key for batch function type `F`.
    pub fn of<F: 'static>() -> Self {
        BatchKey::Function {
            type_id: TypeId::of::<F>(),
            type_name: std::any::type_name::<F>(),
        }
    }
}

impl From<&'static str> for BatchKey {
    fn from(name: &'static str) -> Self {
        BatchKey::Named(Cow::Borrowed(name))
    }
}

impl From<String> for BatchKey {
    fn from(name: String) -> Self {
        BatchKey::Named(Cow::Owned(name))
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchKey::Named(name) => f.write_str(name),
            BatchKey::Function { type_name, .. } => write!(f, "fn:{type_name}"),
        }
    }
}

impl fmt::Debug for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchKey::Named(name) => f.debug_tuple("Named").field(name).finish(),
            BatchKey::Function { type_name, .. } => {
                f.debug_tuple("Function").field(type_name).finish()
            }
        }
    }
}

/// Wave that currently owns an item.
#[derive(Clone)]
struct InFlight {
    wave: u64,
    /// Dropped once every item of the wave is released, which wakes followers.
    done: broadcast::Sender<()>,
}

struct Queue<K> {
    /// Items waiting for a wave, in first-enqueued order.
    pending: IndexSet<K>,
    in_flight: HashMap<K, InFlight>,
}

/// Outcome of [`BatchGroup::claim`].
pub(crate) enum Claim<K> {
    /// The item already has a value.
    Resolved,
    /// Another wave owns the item.
    Follow {
        wave: u64,
        done: broadcast::Receiver<()>,
    },
    /// The caller runs a wave over these items, which are now in flight.
    Lead(Arc<[K]>),
}

/// Pending items, resolved values and per-item context for one batch key.
pub struct BatchGroup<K, V, C = ()> {
    key: BatchKey,
    queue: Mutex<Queue<K>>,
    /// Presence of an entry means "loaded", whatever the value.
    resolved: DashMap<K, V>,
    context: DashMap<K, C>,
}

impl<K, V, C> BatchGroup<K, V, C> {
    /// The key this group was registered under.
    pub fn key(&self) -> &BatchKey {
        &self.key
    }
}

impl<K, V, C> fmt::Debug for BatchGroup<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchGroup")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<K, V, C> BatchGroup<K, V, C>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(key: BatchKey) -> Self {
        Self {
            key,
            queue: Mutex::new(Queue {
                pending: IndexSet::new(),
                in_flight: HashMap::new(),
            }),
            resolved: DashMap::new(),
            context: DashMap::new(),
        }
    }

    /// Creates a new group wrapped in Arc.
    pub fn new_shared(key: BatchKey) -> Arc<Self> {
        Arc::new(Self::new(key))
    }

    /// Adds `item` to the pending set. Duplicates keep their first position.
    ///
    /// A context given for an item that already has one replaces it.
    pub fn enqueue(&self, item: K, context: Option<C>) {
        if let Some(context) = context {
            self.context.insert(item.clone(), context);
        }
        let inserted = self.queue().pending.insert(item);
        trace!(group = %self.key, inserted, "enqueued item");
    }

    /// Snapshot of the pending items, in flight or not.
    pub fn list_pending(&self) -> Arc<[K]> {
        self.queue().pending.iter().cloned().collect()
    }

    /// Removes exactly `items` from the pending set.
    ///
    /// Items enqueued after the snapshot was taken are kept.
    pub fn consume(&self, items: &[K]) {
        let taken: HashSet<&K> = items.iter().collect();
        self.queue().pending.retain(|item| !taken.contains(item));
    }

    /// Decides who loads `item`.
    ///
    /// If no wave owns it and it has no value, every pending item that is not
    /// in flight (plus `item` itself) is handed to `wave`.
    pub(crate) fn claim(&self, item: &K, wave: u64) -> Claim<K> {
        let mut queue = self.queue();
        if let Some(owner) = queue.in_flight.get(item) {
            return Claim::Follow {
                wave: owner.wave,
                done: owner.done.subscribe(),
            };
        }
        if self.resolved.contains_key(item) {
            return Claim::Resolved;
        }

        queue.pending.insert(item.clone());
        let Queue { pending, in_flight } = &mut *queue;
        let items: Arc<[K]> = pending
            .iter()
            .filter(|candidate| !in_flight.contains_key(*candidate))
            .cloned()
            .collect();
        let (done, _) = broadcast::channel(1);
        for item in items.iter() {
            in_flight.insert(
                item.clone(),
                InFlight {
                    wave,
                    done: done.clone(),
                },
            );
        }
        Claim::Lead(items)
    }

    /// Hands `items` back from `wave`, removing them from the pending set
    /// when the wave succeeded.
    pub(crate) fn release(&self, items: &[K], wave: u64, consumed: bool) {
        let mut queue = self.queue();
        for item in items {
            if queue.in_flight.get(item).is_some_and(|owner| owner.wave == wave) {
                queue.in_flight.remove(item);
            }
        }
        if consumed {
            let taken: HashSet<&K> = items.iter().collect();
            queue.pending.retain(|item| !taken.contains(item));
        }
    }

    /// Whether a running wave owns `item`.
    pub fn is_in_flight(&self, item: &K) -> bool {
        self.queue().in_flight.contains_key(item)
    }

    /// Removes and returns the context entries for `items`.
    pub fn take_context(&self, items: &[K]) -> HashMap<K, C> {
        items
            .iter()
            .filter_map(|item| self.context.remove(item))
            .collect()
    }

    pub fn record(&self, item: K, value: V) {
        self.resolved.insert(item, value);
    }

    pub fn is_resolved(&self, item: &K) -> bool {
        self.resolved.contains_key(item)
    }

    /// Returns the resolved value for `item`, or a clone of `default`.
    pub fn resolved_value(&self, item: &K, default: &V) -> V {
        self.resolved
            .get(item)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| default.clone())
    }

    /// Forgets the resolved value for `item`.
    pub fn invalidate(&self, item: &K) {
        if self.resolved.remove(item).is_some() {
            trace!(group = %self.key, "invalidated item");
        }
    }

    pub fn is_pending(&self, item: &K) -> bool {
        self.queue().pending.contains(item)
    }

    pub fn pending_len(&self) -> usize {
        self.queue().pending.len()
    }

    pub fn resolved_len(&self) -> usize {
        self.resolved.len()
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, Queue<K>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
