//! The quota service facade: orchestrates the denial cache, the limits
//! cache, and the evaluator into `check_quota` / `check_quota_enhanced`, and
//! exposes limit CRUD that keeps the limits cache coherent.

use std::sync::Arc;

use chrono::Utc;
use qf_common::{LimitId, QfResult};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::cache::QuotaCache;
use crate::evaluator::{self, Decision};
use crate::denial_cache::DenialCache;
use crate::model::{RequestContext, UsageLimit};
use crate::storage::Storage;

/// Facade over the evaluator, limits cache, and denial cache. Constructed
/// once per [`crate::accounting::Accounting`] instance and shared by `Arc`.
pub struct QuotaService<S: Storage> {
    storage: Arc<S>,
    cache: QuotaCache<S>,
    denial_cache: Mutex<DenialCache>,
}

impl<S: Storage> QuotaService<S> {
    pub async fn new(storage: Arc<S>, denial_cache_capacity: usize) -> QfResult<Self> {
        let cache = QuotaCache::load(storage.clone()).await?;
        Ok(Self {
            storage,
            cache,
            denial_cache: Mutex::new(DenialCache::new(denial_cache_capacity)),
        })
    }

    /// `(allowed, reason)` — discards `retry_after`.
    pub async fn check_quota(&self, ctx: &RequestContext) -> QfResult<(bool, Option<String>)> {
        let (allowed, reason, _retry_after) = self.check_quota_enhanced(ctx).await?;
        Ok((allowed, reason))
    }

    /// `(allowed, reason, retry_after_seconds)`. Consults the denial cache
    /// first; on a cache miss runs the evaluator, then updates the denial
    /// cache (recording a fresh denial, or evicting a stale one on allow).
    #[instrument(skip(self, ctx), fields(model = %ctx.model))]
    pub async fn check_quota_enhanced(&self, ctx: &RequestContext) -> QfResult<(bool, Option<String>, i64)> {
        let now = Utc::now();

        {
            let mut denial_cache = self.denial_cache.lock().await;
            if let Some(denial) = denial_cache.lookup(
                &ctx.model,
                ctx.username.as_deref(),
                ctx.caller_name.as_deref(),
                ctx.project.as_deref(),
                now,
            ) {
                debug!("denial cache hit");
                return Ok((false, Some(denial.reason), denial.retry_after_seconds));
            }
        }

        let limits = self.cache.limits().await;
        match evaluator::evaluate(self.storage.as_ref(), &limits, ctx, now).await? {
            Decision::Allowed => {
                self.denial_cache.lock().await.evict(
                    &ctx.model,
                    ctx.username.as_deref(),
                    ctx.caller_name.as_deref(),
                    ctx.project.as_deref(),
                );
                Ok((true, None, 0))
            }
            Decision::Denied(denial) => {
                self.denial_cache.lock().await.record(
                    &ctx.model,
                    ctx.username.as_deref(),
                    ctx.caller_name.as_deref(),
                    ctx.project.as_deref(),
                    denial.clone(),
                );
                Ok((false, Some(denial.reason), denial.retry_after_seconds))
            }
        }
    }

    pub async fn set_usage_limit(&self, limit: UsageLimit) -> QfResult<LimitId> {
        let id = self.storage.insert_limit(limit).await?;
        self.cache.refresh_limits().await?;
        Ok(id)
    }

    pub async fn delete_usage_limit(&self, id: LimitId) -> QfResult<()> {
        self.storage.delete_limit(id).await?;
        self.cache.refresh_limits().await?;
        Ok(())
    }

    pub async fn get_usage_limits(&self) -> Vec<UsageLimit> {
        self.cache.limits().await
    }

    pub async fn refresh_limits_cache(&self) -> QfResult<()> {
        self.cache.refresh_limits().await
    }

    /// Record that `project` is known, without consulting the backend again
    /// (called by the directory facade after a successful create).
    pub async fn remember_project(&self, project: &str) {
        self.cache.remember_project(project).await;
    }

    /// Record that `username` is known, without consulting the backend again
    /// (called by the directory facade after a successful create).
    pub async fn remember_user(&self, username: &str) {
        self.cache.remember_user(username).await;
    }

    pub async fn project_known(&self, project: &str) -> QfResult<bool> {
        self.cache.project_known(project).await
    }

    pub async fn user_known(&self, username: &str) -> QfResult<bool> {
        self.cache.user_known(username).await
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use crate::model::{IntervalUnit, LimitType, Scope};

    fn ctx(model: &str) -> RequestContext {
        RequestContext {
            model: model.to_string(),
            input_tokens: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn check_quota_allows_with_no_limits() {
        let storage = Arc::new(MemoryStorage::new());
        let service = QuotaService::new(storage, 10).await.unwrap();
        let (allowed, reason) = service.check_quota(&ctx("gpt-4")).await.unwrap();
        assert!(allowed);
        assert!(reason.is_none());
    }

    #[tokio::test]
    async fn denial_is_cached_and_skips_reevaluation() {
        let storage = Arc::new(MemoryStorage::new());
        let service = QuotaService::new(storage, 10).await.unwrap();
        service
            .set_usage_limit(UsageLimit::new(Scope::Global, LimitType::Requests, 0.0, IntervalUnit::Minute, 1))
            .await
            .unwrap();

        let (allowed1, reason1, retry1) = service.check_quota_enhanced(&ctx("gpt-4")).await.unwrap();
        assert!(!allowed1);
        assert!(reason1.is_some());
        assert!(retry1 > 0);

        let (allowed2, reason2, retry2) = service.check_quota_enhanced(&ctx("gpt-4")).await.unwrap();
        assert!(!allowed2);
        assert_eq!(reason1, reason2);
        assert!(retry2 <= retry1);
    }
}
