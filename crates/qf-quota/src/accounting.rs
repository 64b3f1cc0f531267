//! The top-level facade: `Accounting` ties together validation, the quota
//! service, the directory, and the storage backend behind the shape
//! described in the library API.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use qf_common::{EntryId, QfError, QfResult};
use tracing::instrument;

use crate::directory::Directory;
use crate::model::{AccountingEntry, IntervalUnit, LimitType, RequestContext, Scope, UsageLimit};
use crate::quota_service::QuotaService;
use crate::storage::Storage;
use crate::validation::EntryValidator;

/// Parameters accepted by [`Accounting::track_usage`]; named the way the
/// facade's constructor and `track_usage` call are described in the library
/// API (one struct in Rust, keyword arguments in the original).
#[derive(Debug, Clone, Default)]
pub struct UsageRecord {
    pub model: String,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub cost: f64,
    pub execution_time: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub caller_name: Option<String>,
    pub username: Option<String>,
    pub project: Option<String>,
    pub cached_tokens: i64,
    pub reasoning_tokens: i64,
}

/// Remaining headroom under one applicable limit after an insert, per
/// `track_usage_with_remaining_limits`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemainingLimit {
    pub scope: Scope,
    pub limit_type: LimitType,
    pub interval_unit: IntervalUnit,
    pub interval_value: i64,
    pub remaining: f64,
}

/// The scoped accounting/quota resource. Construct with [`Accounting::new`],
/// use for the duration of the process or request scope, and drop when done
/// — there is no separate `close()`: the storage handle's own `Drop` (or the
/// caller's pool shutdown) handles release.
pub struct Accounting<S: Storage> {
    storage: Arc<S>,
    quota_service: QuotaService<S>,
    directory: Directory<S>,
    validator: EntryValidator,
    project_name: Option<String>,
    app_name: Option<String>,
    user_name: Option<String>,
    enforce_project_names: bool,
    enforce_user_names: bool,
}

impl<S: Storage> Accounting<S> {
    pub async fn new(
        storage: Arc<S>,
        denial_cache_capacity: usize,
        enforce_project_names: bool,
        enforce_user_names: bool,
    ) -> QfResult<Self> {
        let quota_service = QuotaService::new(storage.clone(), denial_cache_capacity).await?;
        let directory = Directory::new(storage.clone());
        Ok(Self {
            storage,
            quota_service,
            directory,
            validator: EntryValidator::default_validator(),
            project_name: None,
            app_name: None,
            user_name: None,
            enforce_project_names,
            enforce_user_names,
        })
    }

    pub fn with_project_name(mut self, project_name: impl Into<String>) -> Self {
        self.project_name = Some(project_name.into());
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn with_user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    pub fn quota_service(&self) -> &QuotaService<S> {
        &self.quota_service
    }

    pub fn directory(&self) -> &Directory<S> {
        &self.directory
    }

    async fn check_membership(&self, project: Option<&str>, username: Option<&str>) -> QfResult<()> {
        if self.enforce_project_names {
            if let Some(project) = project {
                if !self.quota_service.project_known(project).await? {
                    return Err(QfError::MembershipDenied {
                        kind: "project",
                        name: project.to_string(),
                    });
                }
            }
        }
        if self.enforce_user_names {
            if let Some(username) = username {
                if !self.quota_service.user_known(username).await? {
                    return Err(QfError::MembershipDenied {
                        kind: "user",
                        name: username.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn resolve(&self, record: &UsageRecord) -> (Option<String>, Option<String>, Option<String>) {
        (
            record.caller_name.clone().or_else(|| self.app_name.clone()),
            record.username.clone().or_else(|| self.user_name.clone()),
            record.project.clone().or_else(|| self.project_name.clone()),
        )
    }

    /// Validate `record`, enforce membership if enabled, and insert one
    /// accounting row.
    #[instrument(skip(self, record), fields(model = %record.model))]
    pub async fn track_usage(&self, record: UsageRecord) -> QfResult<EntryId> {
        let (caller_name, username, project) = self.resolve(&record);
        self.check_membership(project.as_deref(), username.as_deref()).await?;

        let mut entry = AccountingEntry::new(record.model.clone());
        entry.timestamp = record.timestamp.unwrap_or_else(Utc::now);
        entry.caller_name = caller_name;
        entry.username = username;
        entry.project = project;
        entry.prompt_tokens = record.prompt_tokens;
        entry.completion_tokens = record.completion_tokens;
        entry.total_tokens = record.total_tokens;
        entry.cost = record.cost;
        entry.execution_time = record.execution_time;
        entry.cached_tokens = record.cached_tokens;
        entry.reasoning_tokens = record.reasoning_tokens;

        self.validator
            .validate(&entry)
            .map_err(|e| QfError::Validation(e.to_string()))?;

        self.storage.insert_entry(entry).await
    }

    /// `(allowed, reason)`.
    #[allow(clippy::too_many_arguments)]
    pub async fn check_quota(
        &self,
        model: &str,
        username: Option<&str>,
        caller_name: Option<&str>,
        project: Option<&str>,
        input_tokens: i64,
        completion_tokens: i64,
        cost: f64,
    ) -> QfResult<(bool, Option<String>)> {
        let ctx = RequestContext {
            model: model.to_string(),
            username: username.map(str::to_string),
            caller_name: caller_name.map(str::to_string),
            project: project.map(str::to_string),
            input_tokens,
            completion_tokens,
            cost,
        };
        self.quota_service.check_quota(&ctx).await
    }

    /// `(allowed, reason, retry_after_seconds)`.
    #[allow(clippy::too_many_arguments)]
    pub async fn check_quota_enhanced(
        &self,
        model: &str,
        username: Option<&str>,
        caller_name: Option<&str>,
        project: Option<&str>,
        input_tokens: i64,
        completion_tokens: i64,
        cost: f64,
    ) -> QfResult<(bool, Option<String>, i64)> {
        let ctx = RequestContext {
            model: model.to_string(),
            username: username.map(str::to_string),
            caller_name: caller_name.map(str::to_string),
            project: project.map(str::to_string),
            input_tokens,
            completion_tokens,
            cost,
        };
        self.quota_service.check_quota_enhanced(&ctx).await
    }

    /// Insert `record`, then for every limit applicable to it report the
    /// headroom left in its current window.
    pub async fn track_usage_with_remaining_limits(
        &self,
        record: UsageRecord,
    ) -> QfResult<(EntryId, Vec<RemainingLimit>)> {
        let ctx = RequestContext {
            model: record.model.clone(),
            username: record.username.clone().or_else(|| self.user_name.clone()),
            caller_name: record.caller_name.clone().or_else(|| self.app_name.clone()),
            project: record.project.clone().or_else(|| self.project_name.clone()),
            input_tokens: record.prompt_tokens.unwrap_or(0),
            completion_tokens: record.completion_tokens.unwrap_or(0),
            cost: record.cost,
        };

        let id = self.track_usage(record).await?;

        let now = Utc::now();
        let limits = self.quota_service.get_usage_limits().await;
        let mut remaining = Vec::new();
        for limit in limits.iter().filter(|l| crate::evaluator::applies(l, &ctx)) {
            let start = crate::period::period_start(now, limit.interval_unit, limit.interval_value);
            let end = crate::period::period_end(now, start, limit.interval_unit, limit.interval_value);
            let query_end = if limit.interval_unit.is_rolling() {
                end + chrono::Duration::nanoseconds(1)
            } else {
                end
            };
            let filters = crate::evaluator::filters_for_limit(limit);
            let current_usage = self
                .storage
                .sum_usage(limit.limit_type, start, query_end, &filters)
                .await?;

            let headroom = if limit.max_value < 0.0 {
                f64::INFINITY
            } else if limit.max_value == 0.0 {
                0.0
            } else {
                (limit.max_value - current_usage).max(0.0)
            };

            remaining.push(RemainingLimit {
                scope: limit.scope,
                limit_type: limit.limit_type,
                interval_unit: limit.interval_unit,
                interval_value: limit.interval_value,
                remaining: headroom,
            });
        }

        Ok((id, remaining))
    }

    pub async fn set_usage_limit(&self, limit: UsageLimit) -> QfResult<qf_common::LimitId> {
        self.quota_service.set_usage_limit(limit).await
    }

    pub async fn delete_usage_limit(&self, id: qf_common::LimitId) -> QfResult<()> {
        self.quota_service.delete_usage_limit(id).await
    }

    pub async fn get_usage_limits(&self) -> Vec<UsageLimit> {
        self.quota_service.get_usage_limits().await
    }

    pub async fn tail(&self, n: usize) -> QfResult<Vec<AccountingEntry>> {
        self.storage.tail(n).await
    }

    pub async fn purge(&self) -> QfResult<()> {
        self.storage.purge().await?;
        self.quota_service.refresh_limits_cache().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use crate::model::IntervalUnit;

    async fn accounting() -> Accounting<MemoryStorage> {
        Accounting::new(Arc::new(MemoryStorage::new()), 100, false, false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn track_usage_inserts_and_rejects_empty_model() {
        let acc = accounting().await;
        let id = acc
            .track_usage(UsageRecord {
                model: "gpt-4".to_string(),
                prompt_tokens: Some(10),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(id.0 > 0);

        let err = acc
            .track_usage(UsageRecord {
                model: String::new(),
                ..Default::default()
            })
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn membership_enforcement_rejects_unknown_project() {
        let acc = Accounting::new(Arc::new(MemoryStorage::new()), 100, true, false)
            .await
            .unwrap();
        let err = acc
            .track_usage(UsageRecord {
                model: "gpt-4".to_string(),
                project: Some("ghost".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(err, Err(QfError::MembershipDenied { kind: "project", .. })));
    }

    #[tokio::test]
    async fn track_usage_with_remaining_limits_reports_headroom() {
        let acc = accounting().await;
        acc.set_usage_limit(UsageLimit::new(Scope::Global, LimitType::Requests, 5.0, IntervalUnit::Minute, 1))
            .await
            .unwrap();

        let (_, remaining) = acc
            .track_usage_with_remaining_limits(UsageRecord {
                model: "gpt-4".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].remaining, 4.0);
    }

    #[tokio::test]
    async fn purge_clears_entries_and_limits() {
        let acc = accounting().await;
        acc.set_usage_limit(UsageLimit::new(Scope::Global, LimitType::Requests, 5.0, IntervalUnit::Minute, 1))
            .await
            .unwrap();
        acc.track_usage(UsageRecord {
            model: "gpt-4".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        acc.purge().await.unwrap();
        assert!(acc.tail(10).await.unwrap().is_empty());
        assert!(acc.get_usage_limits().await.is_empty());
    }
}
