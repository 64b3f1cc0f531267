//! Project and user directory management: the CRUD surface behind the CLI's
//! `users`/`projects` commands and behind membership enforcement.

use std::sync::Arc;

use chrono::Utc;
use qf_common::{QfError, QfResult};

use crate::model::DirectoryEntry;
use crate::quota_service::QuotaService;
use crate::storage::Storage;

/// Thin facade over the storage backend's directory tables, kept in sync
/// with the quota service's membership cache on create.
pub struct Directory<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> Directory<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    pub async fn create_project(&self, name: &str, quota_service: &QuotaService<S>) -> QfResult<()> {
        if name.trim().is_empty() {
            return Err(QfError::Validation("project name must not be empty".to_string()));
        }
        self.storage.create_project(DirectoryEntry::new(name)).await?;
        quota_service.remember_project(name).await;
        Ok(())
    }

    pub async fn create_user(&self, name: &str, quota_service: &QuotaService<S>) -> QfResult<()> {
        if name.trim().is_empty() {
            return Err(QfError::Validation("user name must not be empty".to_string()));
        }
        self.storage.create_user(DirectoryEntry::new(name)).await?;
        quota_service.remember_user(name).await;
        Ok(())
    }

    pub async fn list_projects(&self) -> QfResult<Vec<DirectoryEntry>> {
        self.storage.list_projects().await
    }

    pub async fn list_users(&self) -> QfResult<Vec<DirectoryEntry>> {
        self.storage.list_users().await
    }

    pub async fn deactivate_project(&self, name: &str) -> QfResult<()> {
        let mut entry = self
            .storage
            .get_project(name)
            .await?
            .ok_or_else(|| QfError::NotFound(format!("project {name:?}")))?;
        entry.enabled = false;
        entry.last_disabled_at = Some(Utc::now());
        self.storage.update_project(entry).await
    }

    pub async fn deactivate_user(&self, name: &str) -> QfResult<()> {
        let mut entry = self
            .storage
            .get_user(name)
            .await?
            .ok_or_else(|| QfError::NotFound(format!("user {name:?}")))?;
        entry.enabled = false;
        entry.last_disabled_at = Some(Utc::now());
        self.storage.update_user(entry).await
    }

    pub async fn reactivate_project(&self, name: &str) -> QfResult<()> {
        let mut entry = self
            .storage
            .get_project(name)
            .await?
            .ok_or_else(|| QfError::NotFound(format!("project {name:?}")))?;
        entry.enabled = true;
        entry.last_enabled_at = Utc::now();
        self.storage.update_project(entry).await
    }

    pub async fn reactivate_user(&self, name: &str) -> QfResult<()> {
        let mut entry = self
            .storage
            .get_user(name)
            .await?
            .ok_or_else(|| QfError::NotFound(format!("user {name:?}")))?;
        entry.enabled = true;
        entry.last_enabled_at = Utc::now();
        self.storage.update_user(entry).await
    }

    pub async fn delete_project(&self, name: &str) -> QfResult<()> {
        self.storage.delete_project(name).await
    }

    pub async fn delete_user(&self, name: &str) -> QfResult<()> {
        self.storage.delete_user(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;

    #[tokio::test]
    async fn create_project_rejects_empty_name() {
        let storage = Arc::new(MemoryStorage::new());
        let quota_service = QuotaService::new(storage.clone(), 10).await.unwrap();
        let directory = Directory::new(storage);
        assert!(directory.create_project("", &quota_service).await.is_err());
    }

    #[tokio::test]
    async fn create_then_deactivate_user() {
        let storage = Arc::new(MemoryStorage::new());
        let quota_service = QuotaService::new(storage.clone(), 10).await.unwrap();
        let directory = Directory::new(storage);
        directory.create_user("alice", &quota_service).await.unwrap();
        assert!(quota_service.user_known("alice").await.unwrap());

        directory.deactivate_user("alice").await.unwrap();
        let entry = directory.list_users().await.unwrap().into_iter().next().unwrap();
        assert!(!entry.enabled);
        assert!(entry.last_disabled_at.is_some());
    }

    #[tokio::test]
    async fn deactivate_then_reactivate_project() {
        let storage = Arc::new(MemoryStorage::new());
        let quota_service = QuotaService::new(storage.clone(), 10).await.unwrap();
        let directory = Directory::new(storage);
        directory.create_project("acme", &quota_service).await.unwrap();

        directory.deactivate_project("acme").await.unwrap();
        assert!(!directory.list_projects().await.unwrap()[0].enabled);

        directory.reactivate_project("acme").await.unwrap();
        let entry = directory.list_projects().await.unwrap().into_iter().next().unwrap();
        assert!(entry.enabled);
    }

    #[tokio::test]
    async fn delete_user_removes_entry() {
        let storage = Arc::new(MemoryStorage::new());
        let quota_service = QuotaService::new(storage.clone(), 10).await.unwrap();
        let directory = Directory::new(storage);
        directory.create_user("bob", &quota_service).await.unwrap();
        assert_eq!(directory.list_users().await.unwrap().len(), 1);

        directory.delete_user("bob").await.unwrap();
        assert!(directory.list_users().await.unwrap().is_empty());
    }
}
