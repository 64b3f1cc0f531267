//! In-process caches fronting the storage backend: the full limits set and
//! the project/user membership sets. Populated eagerly on construction and
//! refreshed explicitly after a mutation.

use std::collections::HashSet;
use std::sync::Arc;

use qf_common::QfResult;
use tokio::sync::RwLock;

use crate::model::UsageLimit;
use crate::storage::Storage;

/// Holds the limits set and membership sets read through a [`Storage`]
/// backend, refreshed on demand rather than on a timer.
pub struct QuotaCache<S: Storage> {
    storage: Arc<S>,
    limits: RwLock<Vec<UsageLimit>>,
    projects: RwLock<HashSet<String>>,
    users: RwLock<HashSet<String>>,
}

impl<S: Storage> QuotaCache<S> {
    pub async fn load(storage: Arc<S>) -> QfResult<Self> {
        let limits = storage.list_limits().await?;
        Ok(Self {
            storage,
            limits: RwLock::new(limits),
            projects: RwLock::new(HashSet::new()),
            users: RwLock::new(HashSet::new()),
        })
    }

    pub async fn limits(&self) -> Vec<UsageLimit> {
        self.limits.read().await.clone()
    }

    pub async fn refresh_limits(&self) -> QfResult<()> {
        let fresh = self.storage.list_limits().await?;
        *self.limits.write().await = fresh;
        Ok(())
    }

    /// Note that `project` is a known project, without consulting the backend.
    pub async fn remember_project(&self, project: &str) {
        self.projects.write().await.insert(project.to_string());
    }

    /// Note that `username` is a known user, without consulting the backend.
    pub async fn remember_user(&self, username: &str) {
        self.users.write().await.insert(username.to_string());
    }

    pub async fn refresh_projects(&self) -> QfResult<()> {
        self.projects.write().await.clear();
        Ok(())
    }

    pub async fn refresh_users(&self) -> QfResult<()> {
        self.users.write().await.clear();
        Ok(())
    }

    /// Whether `project` is known, checking the local cache first and the
    /// backend on a miss (caching the result either way).
    pub async fn project_known(&self, project: &str) -> QfResult<bool> {
        if self.projects.read().await.contains(project) {
            return Ok(true);
        }
        let known = self.storage.project_exists(project).await?;
        if known {
            self.remember_project(project).await;
        }
        Ok(known)
    }

    /// Whether `username` is known, checking the local cache first and the
    /// backend on a miss (caching the result either way).
    pub async fn user_known(&self, username: &str) -> QfResult<bool> {
        if self.users.read().await.contains(username) {
            return Ok(true);
        }
        let known = self.storage.user_exists(username).await?;
        if known {
            self.remember_user(username).await;
        }
        Ok(known)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use crate::model::{IntervalUnit, LimitType, Scope};

    #[tokio::test]
    async fn limits_cache_reflects_storage_after_refresh() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = QuotaCache::load(storage.clone()).await.unwrap();
        assert!(cache.limits().await.is_empty());

        storage
            .insert_limit(UsageLimit::new(Scope::Global, LimitType::Requests, 10.0, IntervalUnit::Minute, 1))
            .await
            .unwrap();
        assert!(cache.limits().await.is_empty(), "cache should not see the write until refreshed");

        cache.refresh_limits().await.unwrap();
        assert_eq!(cache.limits().await.len(), 1);
    }

    #[tokio::test]
    async fn project_known_caches_backend_lookup() {
        let storage = Arc::new(MemoryStorage::new());
        storage.create_project(crate::model::DirectoryEntry::new("alpha")).await.unwrap();
        let cache = QuotaCache::load(storage.clone()).await.unwrap();
        assert!(cache.project_known("alpha").await.unwrap());
        assert!(!cache.project_known("beta").await.unwrap());
    }
}
