//! An in-memory reference backend. Useful for tests, local development, and
//! as a template for a durable implementation of the [`Storage`] contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use qf_common::{EntryId, LimitId, QfError, QfResult};
use tokio::sync::RwLock;

use crate::model::{AccountingEntry, DirectoryEntry, LimitType, UsageLimit};
use crate::storage::{Storage, UsageFilters};

#[derive(Default)]
struct State {
    entries: Vec<AccountingEntry>,
    limits: Vec<UsageLimit>,
    projects: HashMap<String, DirectoryEntry>,
    users: HashMap<String, DirectoryEntry>,
}

/// A process-local [`Storage`] implementation backed by `Vec`s behind a lock.
/// Not durable across restarts; intended for tests and single-process
/// deployments with no persistence requirement.
pub struct MemoryStorage {
    state: RwLock<State>,
    next_entry_id: AtomicI64,
    next_limit_id: AtomicI64,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            next_entry_id: AtomicI64::new(1),
            next_limit_id: AtomicI64::new(1),
        }
    }
}

impl Storage for MemoryStorage {
    async fn insert_entry(&self, mut entry: AccountingEntry) -> QfResult<EntryId> {
        let id = EntryId(self.next_entry_id.fetch_add(1, Ordering::Relaxed));
        entry.id = Some(id);
        self.state.write().await.entries.push(entry);
        Ok(id)
    }

    async fn sum_usage(
        &self,
        limit_type: LimitType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filters: &UsageFilters,
    ) -> QfResult<f64> {
        let state = self.state.read().await;
        let total = state
            .entries
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp < end)
            .filter(|e| filters.matches(e))
            .map(|e| {
                let input = e.prompt_tokens.unwrap_or(0);
                let completion = e.completion_tokens.unwrap_or(0);
                limit_type.request_value(input, completion, e.cost)
            })
            .sum();
        Ok(total)
    }

    async fn list_limits(&self) -> QfResult<Vec<UsageLimit>> {
        Ok(self.state.read().await.limits.clone())
    }

    async fn insert_limit(&self, mut limit: UsageLimit) -> QfResult<LimitId> {
        let id = LimitId(self.next_limit_id.fetch_add(1, Ordering::Relaxed));
        limit.id = Some(id);
        limit.created_at = Some(Utc::now());
        limit.updated_at = limit.created_at;
        self.state.write().await.limits.push(limit);
        Ok(id)
    }

    async fn delete_limit(&self, id: LimitId) -> QfResult<()> {
        self.state.write().await.limits.retain(|l| l.id != Some(id));
        Ok(())
    }

    async fn tail(&self, n: usize) -> QfResult<Vec<AccountingEntry>> {
        let state = self.state.read().await;
        Ok(state.entries.iter().rev().take(n).cloned().collect())
    }

    async fn purge(&self) -> QfResult<()> {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.limits.clear();
        Ok(())
    }

    async fn project_exists(&self, project: &str) -> QfResult<bool> {
        Ok(self.state.read().await.projects.contains_key(project))
    }

    async fn user_exists(&self, username: &str) -> QfResult<bool> {
        Ok(self.state.read().await.users.contains_key(username))
    }

    async fn create_project(&self, entry: DirectoryEntry) -> QfResult<()> {
        let mut state = self.state.write().await;
        if state.projects.contains_key(&entry.name) {
            return Err(QfError::Validation(format!("project {:?} already exists", entry.name)));
        }
        state.projects.insert(entry.name.clone(), entry);
        Ok(())
    }

    async fn create_user(&self, entry: DirectoryEntry) -> QfResult<()> {
        let mut state = self.state.write().await;
        if state.users.contains_key(&entry.name) {
            return Err(QfError::Validation(format!("user {:?} already exists", entry.name)));
        }
        state.users.insert(entry.name.clone(), entry);
        Ok(())
    }

    async fn get_project(&self, name: &str) -> QfResult<Option<DirectoryEntry>> {
        Ok(self.state.read().await.projects.get(name).cloned())
    }

    async fn get_user(&self, name: &str) -> QfResult<Option<DirectoryEntry>> {
        Ok(self.state.read().await.users.get(name).cloned())
    }

    async fn list_projects(&self) -> QfResult<Vec<DirectoryEntry>> {
        Ok(self.state.read().await.projects.values().cloned().collect())
    }

    async fn list_users(&self) -> QfResult<Vec<DirectoryEntry>> {
        Ok(self.state.read().await.users.values().cloned().collect())
    }

    async fn update_project(&self, entry: DirectoryEntry) -> QfResult<()> {
        let mut state = self.state.write().await;
        if !state.projects.contains_key(&entry.name) {
            return Err(QfError::NotFound(format!("project {:?}", entry.name)));
        }
        state.projects.insert(entry.name.clone(), entry);
        Ok(())
    }

    async fn update_user(&self, entry: DirectoryEntry) -> QfResult<()> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&entry.name) {
            return Err(QfError::NotFound(format!("user {:?}", entry.name)));
        }
        state.users.insert(entry.name.clone(), entry);
        Ok(())
    }

    async fn delete_project(&self, name: &str) -> QfResult<()> {
        self.state.write().await.projects.remove(name);
        Ok(())
    }

    async fn delete_user(&self, name: &str) -> QfResult<()> {
        self.state.write().await.users.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Scope;

    #[tokio::test]
    async fn insert_and_sum_usage() {
        let storage = MemoryStorage::new();
        let mut entry = AccountingEntry::new("gpt-4");
        entry.timestamp = "2024-01-01T00:00:05Z".parse().unwrap();
        entry.prompt_tokens = Some(100);
        entry.completion_tokens = Some(50);
        storage.insert_entry(entry).await.unwrap();

        let total = storage
            .sum_usage(
                LimitType::TotalTokens,
                "2024-01-01T00:00:00Z".parse().unwrap(),
                "2024-01-01T00:01:00Z".parse().unwrap(),
                &UsageFilters::default(),
            )
            .await
            .unwrap();
        assert_eq!(total, 150.0);
    }

    #[tokio::test]
    async fn limit_insert_delete_roundtrip() {
        let storage = MemoryStorage::new();
        let id = storage
            .insert_limit(UsageLimit::new(
                Scope::Global,
                LimitType::Requests,
                100.0,
                crate::model::IntervalUnit::Minute,
                1,
            ))
            .await
            .unwrap();
        assert_eq!(storage.list_limits().await.unwrap().len(), 1);
        storage.delete_limit(id).await.unwrap();
        assert!(storage.list_limits().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn directory_membership() {
        let storage = MemoryStorage::new();
        assert!(!storage.project_exists("alpha").await.unwrap());
        storage.create_project(DirectoryEntry::new("alpha")).await.unwrap();
        assert!(storage.project_exists("alpha").await.unwrap());
    }

    #[tokio::test]
    async fn create_project_rejects_duplicate_name() {
        let storage = MemoryStorage::new();
        storage.create_project(DirectoryEntry::new("alpha")).await.unwrap();
        assert!(storage.create_project(DirectoryEntry::new("alpha")).await.is_err());
    }
}
