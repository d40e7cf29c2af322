//! Shared fixtures: an in-memory user repository that records every query.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use batchload_core::{
    BatchFn, BindOptions, BoxError, ContextMap, DeferredValue, Loader, Scope,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub name: String,
}

batchload_core::impl_resolve_as_ready!(User);

/// Stand-in for a database table of users.
#[derive(Default)]
pub struct UserRepository {
    users: Mutex<BTreeMap<u64, User>>,
    queries: Mutex<Vec<Vec<u64>>>,
}

impl UserRepository {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn save(&self, id: u64) -> User {
        let user = User {
            id,
            name: format!("user{id}"),
        };
        self.users.lock().unwrap().insert(id, user.clone());
        user
    }

    /// Batched lookup; every call is recorded.
    pub async fn find_many(&self, ids: &[u64]) -> Vec<User> {
        self.queries.lock().unwrap().push(ids.to_vec());
        tokio::task::yield_now().await;
        let users = self.users.lock().unwrap();
        ids.iter().filter_map(|id| users.get(id).cloned()).collect()
    }

    pub fn queries(&self) -> Vec<Vec<u64>> {
        self.queries.lock().unwrap().clone()
    }
}

/// A post referencing its author by id.
#[derive(Debug, Clone, Copy)]
pub struct Post {
    pub user_id: u64,
}

impl Post {
    pub fn new(user_id: u64) -> Self {
        Self { user_id }
    }

    /// The post's author, loaded together with every other pending author.
    pub fn user_lazy(
        &self,
        scope: &Scope,
        repo: &Arc<UserRepository>,
        cache: bool,
    ) -> DeferredValue<u64, Option<User>> {
        scope
            .defer(self.user_id)
            .batch_with(
                LoadUsers {
                    repo: Arc::clone(repo),
                },
                BindOptions::default().with_cache(cache),
            )
            .unwrap()
    }
}

/// Batch function loading users by id.
pub struct LoadUsers {
    pub repo: Arc<UserRepository>,
}

#[async_trait]
impl BatchFn<u64, Option<User>> for LoadUsers {
    async fn load(
        &self,
        ids: Arc<[u64]>,
        loader: Loader<u64, Option<User>>,
        _context: ContextMap<u64, ()>,
    ) -> Result<(), BoxError> {
        for user in self.repo.find_many(&ids).await {
            loader.load(user.id, Some(user.clone()))?;
        }
        Ok(())
    }
}
