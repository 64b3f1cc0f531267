//! The storage contract: everything a backend must implement to serve
//! accounting inserts, usage aggregation, limit CRUD, and directory lookups.

use chrono::{DateTime, Utc};
use qf_common::{EntryId, LimitId, QfResult};

use crate::model::{AccountingEntry, DirectoryEntry, LimitType, UsageLimit};

/// A dimensional predicate applied when aggregating usage: match a specific
/// value, require the column be unset, require it be set, or ignore it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldFilter {
    Equals(String),
    IsNull,
    IsNotNull,
}

impl FieldFilter {
    pub fn matches(&self, value: Option<&str>) -> bool {
        match self {
            FieldFilter::Equals(expected) => value == Some(expected.as_str()),
            FieldFilter::IsNull => value.is_none(),
            FieldFilter::IsNotNull => value.is_some(),
        }
    }
}

/// Dimensional filters for a usage aggregation query. A field left `None`
/// imposes no predicate (matches any value, set or unset).
#[derive(Debug, Clone, Default)]
pub struct UsageFilters {
    pub model: Option<FieldFilter>,
    pub username: Option<FieldFilter>,
    pub caller_name: Option<FieldFilter>,
    pub project: Option<FieldFilter>,
}

impl UsageFilters {
    pub fn matches(&self, entry: &AccountingEntry) -> bool {
        self.model.as_ref().map(|f| f.matches(Some(entry.model.as_str()))).unwrap_or(true)
            && self.username.as_ref().map(|f| f.matches(entry.username.as_deref())).unwrap_or(true)
            && self.caller_name.as_ref().map(|f| f.matches(entry.caller_name.as_deref())).unwrap_or(true)
            && self.project.as_ref().map(|f| f.matches(entry.project.as_deref())).unwrap_or(true)
    }
}

/// Persistence contract for the accounting and quota engine. Implementations
/// are expected to be cheap to clone (an `Arc`-backed handle) and safe to
/// share across tasks.
#[trait_variant::make(Storage: Send)]
pub trait LocalStorage {
    /// Append a usage entry, assigning it a fresh id.
    async fn insert_entry(&self, entry: AccountingEntry) -> QfResult<EntryId>;

    /// Sum `limit_type`'s value across entries in `[start, end)` matching `filters`.
    async fn sum_usage(
        &self,
        limit_type: LimitType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filters: &UsageFilters,
    ) -> QfResult<f64>;

    /// All configured usage limits.
    async fn list_limits(&self) -> QfResult<Vec<UsageLimit>>;

    /// Insert a new limit, assigning it a fresh id.
    async fn insert_limit(&self, limit: UsageLimit) -> QfResult<LimitId>;

    /// Remove a limit by id. No-op (not an error) if it does not exist.
    async fn delete_limit(&self, id: LimitId) -> QfResult<()>;

    /// The `n` most recently inserted entries, newest first.
    async fn tail(&self, n: usize) -> QfResult<Vec<AccountingEntry>>;

    /// Clear both the usage and limits tables.
    async fn purge(&self) -> QfResult<()>;

    /// Whether `project` is a known, registered project.
    async fn project_exists(&self, project: &str) -> QfResult<bool>;

    /// Whether `username` is a known, registered user.
    async fn user_exists(&self, username: &str) -> QfResult<bool>;

    /// Create a project directory entry. Errors if the name already exists.
    async fn create_project(&self, entry: DirectoryEntry) -> QfResult<()>;

    /// Create a user directory entry. Errors if the name already exists.
    async fn create_user(&self, entry: DirectoryEntry) -> QfResult<()>;

    async fn get_project(&self, name: &str) -> QfResult<Option<DirectoryEntry>>;
    async fn get_user(&self, name: &str) -> QfResult<Option<DirectoryEntry>>;
    async fn list_projects(&self) -> QfResult<Vec<DirectoryEntry>>;
    async fn list_users(&self) -> QfResult<Vec<DirectoryEntry>>;
    async fn update_project(&self, entry: DirectoryEntry) -> QfResult<()>;
    async fn update_user(&self, entry: DirectoryEntry) -> QfResult<()>;
    async fn delete_project(&self, name: &str) -> QfResult<()>;
    async fn delete_user(&self, name: &str) -> QfResult<()>;
}
