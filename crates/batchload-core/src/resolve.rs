//! Recursive resolution of nested deferred values.
//!
//! [`Resolve`] is the "deferred" capability a host (an HTTP handler, a GraphQL
//! executor, a job) looks for: anything implementing it can be turned into a
//! concrete value with [`Resolve::resolve_all`]. Containers resolve their
//! elements in order, and a deferred value whose batch function produced
//! another deferred value keeps resolving until a concrete value is reached.
//!
//! Elements are resolved one after another. The first element of a group
//! triggers the wave that loads every pending element of that group, so the
//! remaining elements resolve without further batch function calls.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use async_trait::async_trait;

use crate::deferred::DeferredValue;
use crate::error::BatchLoadResult;

/// A value that may contain deferred values.
#[async_trait]
pub trait Resolve: Send + Sized {
    /// The same shape with every deferred value replaced by its value.
    type Output: Send;

    async fn resolve_all(self) -> BatchLoadResult<Self::Output>;
}

/// Resolves every deferred value inside `value`.
pub async fn resolve_all<T: Resolve>(value: T) -> BatchLoadResult<T::Output> {
    value.resolve_all().await
}

/// Wraps a concrete value so it can sit inside resolvable structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ready<T>(pub T);

#[async_trait]
impl<T: Send> Resolve for Ready<T> {
    type Output = T;

    async fn resolve_all(self) -> BatchLoadResult<T> {
        Ok(self.0)
    }
}

/// Implements [`Resolve`] for types that never contain deferred values.
#[macro_export]
macro_rules! impl_resolve_as_ready {
    ($($ty:ty),* $(,)?) => {
        $(
            #[$crate::__private::async_trait]
            impl $crate::Resolve for $ty {
                type Output = $ty;

                async fn resolve_all(self) -> $crate::BatchLoadResult<$ty> {
                    Ok(self)
                }
            }
        )*
    };
}

impl_resolve_as_ready!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    &'static str,
);

#[async_trait]
impl<K, V, C> Resolve for DeferredValue<K, V, C>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Resolve + Clone + Sync + 'static,
    C: Send + Sync + 'static,
{
    type Output = V::Output;

    async fn resolve_all(mut self) -> BatchLoadResult<V::Output> {
        let value = self.resolve().await?;
        value.resolve_all().await
    }
}

#[async_trait]
impl<T: Resolve> Resolve for Option<T> {
    type Output = Option<T::Output>;

    async fn resolve_all(self) -> BatchLoadResult<Self::Output> {
        match self {
            Some(value) => Ok(Some(value.resolve_all().await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<T: Resolve> Resolve for Box<T> {
    type Output = T::Output;

    async fn resolve_all(self) -> BatchLoadResult<Self::Output> {
        (*self).resolve_all().await
    }
}

#[async_trait]
impl<T: Resolve> Resolve for Vec<T> {
    type Output = Vec<T::Output>;

    async fn resolve_all(self) -> BatchLoadResult<Self::Output> {
        let mut resolved = Vec::with_capacity(self.len());
        for value in self {
            resolved.push(value.resolve_all().await?);
        }
        Ok(resolved)
    }
}

#[async_trait]
impl<K, T> Resolve for HashMap<K, T>
where
    K: Eq + Hash + Send,
    T: Resolve,
{
    type Output = HashMap<K, T::Output>;

    async fn resolve_all(self) -> BatchLoadResult<Self::Output> {
        let mut resolved = HashMap::with_capacity(self.len());
        for (key, value) in self {
            resolved.insert(key, value.resolve_all().await?);
        }
        Ok(resolved)
    }
}

#[async_trait]
impl<K, T> Resolve for BTreeMap<K, T>
where
    K: Ord + Send,
    T: Resolve,
{
    type Output = BTreeMap<K, T::Output>;

    async fn resolve_all(self) -> BatchLoadResult<Self::Output> {
        let mut resolved = BTreeMap::new();
        for (key, value) in self {
            resolved.insert(key, value.resolve_all().await?);
        }
        Ok(resolved)
    }
}

#[async_trait]
impl<A: Resolve, B: Resolve> Resolve for (A, B) {
    type Output = (A::Output, B::Output);

    async fn resolve_all(self) -> BatchLoadResult<Self::Output> {
        let (a, b) = self;
        Ok((a.resolve_all().await?, b.resolve_all().await?))
    }
}

#[async_trait]
impl<A: Resolve, B: Resolve, C: Resolve> Resolve for (A, B, C) {
    type Output = (A::Output, B::Output, C::Output);

    async fn resolve_all(self) -> BatchLoadResult<Self::Output> {
        let (a, b, c) = self;
        Ok((
            a.resolve_all().await?,
            b.resolve_all().await?,
            c.resolve_all().await?,
        ))
    }
}
