//! The limit evaluator: the heart of the core. Given a request context and the
//! full set of configured limits, decides whether the request is admitted and,
//! on denial, computes a human-readable reason and a retry-after duration.

use chrono::{DateTime, Utc};
use qf_common::QfResult;

use crate::model::{IntervalUnit, RequestContext, Scope, UsageLimit};
use crate::period::{add_interval, period_end as compute_period_end, period_start as compute_period_start};
use crate::storage::{FieldFilter, Storage, UsageFilters};

/// Outcome of evaluating one request against the full limit set.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allowed,
    Denied(Denial),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Denial {
    pub reason: String,
    pub retry_after_seconds: i64,
    pub reset_instant: DateTime<Utc>,
}

/// The fixed categorization order in which limits are evaluated; the first
/// denial wins. Observable in denial messages and relied on by tests.
fn evaluation_order(limit: &UsageLimit, ctx: &RequestContext) -> Option<u8> {
    match limit.scope {
        Scope::Model => Some(0),
        Scope::Project => Some(1),
        Scope::Global => Some(2),
        Scope::User => Some(3),
        Scope::Caller => {
            if limit.username.is_none() {
                Some(4)
            } else {
                Some(5)
            }
        }
    }
    .filter(|_| applies(limit, ctx))
}

fn field_matches(limit_field: &Option<String>, request_field: Option<&str>) -> bool {
    match limit_field.as_deref() {
        None => true,
        Some("*") => true,
        Some(expected) => Some(expected) == request_field,
    }
}

/// Whether `limit` applies to `ctx`, per the dimensional matching rules.
pub(crate) fn applies(limit: &UsageLimit, ctx: &RequestContext) -> bool {
    if limit.scope == Scope::Global {
        return true;
    }

    if limit.scope == Scope::Project && limit.project_name.is_none() {
        return ctx.project.is_none();
    }

    field_matches(&limit.model, Some(ctx.model.as_str()))
        && field_matches(&limit.username, ctx.username.as_deref())
        && field_matches(&limit.caller_name, ctx.caller_name.as_deref())
        && field_matches(&limit.project_name, ctx.project.as_deref())
}

/// Whether `limit` is an override-allow (`max_value < 0`) whose dimensional
/// specificity exactly matches the request — i.e. not itself a wildcard.
fn is_exact_override(limit: &UsageLimit, ctx: &RequestContext) -> bool {
    if !limit.is_unlimited() {
        return false;
    }
    let exact = |field: &Option<String>, request: Option<&str>| match field.as_deref() {
        None | Some("*") => false,
        Some(v) => Some(v) == request,
    };
    exact(&limit.model, Some(ctx.model.as_str()))
        || exact(&limit.username, ctx.username.as_deref())
        || exact(&limit.caller_name, ctx.caller_name.as_deref())
        || exact(&limit.project_name, ctx.project.as_deref())
}

fn filter_for(field: &Option<String>, scope_is_project_null: bool) -> Option<FieldFilter> {
    if scope_is_project_null {
        return Some(FieldFilter::IsNull);
    }
    match field.as_deref() {
        None | Some("*") => None,
        Some(v) => Some(FieldFilter::Equals(v.to_string())),
    }
}

pub(crate) fn filters_for_limit(limit: &UsageLimit) -> UsageFilters {
    let project_null = limit.scope == Scope::Project && limit.project_name.is_none();
    UsageFilters {
        model: filter_for(&limit.model, false),
        username: filter_for(&limit.username, false),
        caller_name: filter_for(&limit.caller_name, false),
        project: filter_for(&limit.project_name, project_null),
    }
}

/// The dimensions that distinguish `limit`, scoped to what's relevant for its
/// own `Scope` (e.g. USER shows only the username, CALLER shows username and
/// caller, PROJECT shows the project or its absence).
fn dimension_detail(limit: &UsageLimit) -> String {
    let mut parts = Vec::new();
    match limit.scope {
        Scope::Model => {
            if let Some(model) = limit.model.as_deref().filter(|v| *v != "*") {
                parts.push(format!("model: {model}"));
            }
        }
        Scope::Project => match limit.project_name.as_deref() {
            None => parts.push("no project".to_string()),
            Some("*") => {}
            Some(project) => parts.push(format!("project: {project}")),
        },
        Scope::User => {
            if let Some(username) = limit.username.as_deref().filter(|v| *v != "*") {
                parts.push(format!("user: {username}"));
            }
        }
        Scope::Caller => {
            if let Some(username) = limit.username.as_deref().filter(|v| *v != "*") {
                parts.push(format!("user: {username}"));
            }
            if let Some(caller) = limit.caller_name.as_deref().filter(|v| *v != "*") {
                parts.push(format!("caller: {caller}"));
            }
        }
        Scope::Global => {}
    }
    parts.join(", ")
}

/// Render the scope prefix plus parenthetical dimensional detail, e.g.
/// `USER (user: alice)`. GLOBAL never carries a parenthetical.
fn scope_label(limit: &UsageLimit) -> String {
    if limit.scope == Scope::Global {
        return limit.scope.to_string();
    }
    let detail = dimension_detail(limit);
    if detail.is_empty() {
        limit.scope.to_string()
    } else {
        format!("{} ({})", limit.scope, detail)
    }
}

/// Pluralize the unit name the way the original, imperfect implementation
/// does: append `s` whenever `interval_value > 1` and the unit doesn't
/// already end in `s`. Preserved verbatim per contract, ugly artifacts
/// (`second_rollings`) included.
fn pluralized_unit(unit: IntervalUnit, value: i64) -> String {
    let base = unit.as_str();
    if value > 1 && !base.ends_with('s') {
        format!("{base}s")
    } else {
        base.to_string()
    }
}

fn format_reason(limit: &UsageLimit, current_usage: f64, request_value: f64) -> String {
    format!(
        "{} limit: {:.2} {} per {} {} exceeded. Current usage: {:.2}, request: {:.2}.",
        scope_label(limit),
        limit.max_value,
        limit.limit_type,
        limit.interval_value,
        pluralized_unit(limit.interval_unit, limit.interval_value),
        current_usage,
        request_value,
    )
}

/// The reset instant used to compute retry-after.
///
/// Fixed intervals: the start of the next aligned period, always in the
/// future relative to `now` by construction.
///
/// Rolling intervals: `period_start + duration(value, unit)` — for
/// non-month units this is algebraically `now` (since `period_start = now -
/// duration`), so `retry_after` is typically zero; it can be positive only
/// for MONTH_ROLLING, where calendar-month arithmetic is not a fixed
/// duration.
fn reset_instant(limit: &UsageLimit, start: DateTime<Utc>, end: DateTime<Utc>) -> DateTime<Utc> {
    if limit.interval_unit.is_rolling() {
        add_interval(start, limit.interval_unit, limit.interval_value)
    } else {
        end
    }
}

/// Evaluate every limit applicable to `ctx`, in the fixed categorization
/// order, returning the first denial (or `Allowed` if none fires).
pub async fn evaluate<S: Storage + ?Sized>(
    storage: &S,
    limits: &[UsageLimit],
    ctx: &RequestContext,
    now: DateTime<Utc>,
) -> QfResult<Decision> {
    let mut applicable: Vec<(u8, &UsageLimit)> = limits
        .iter()
        .filter_map(|l| evaluation_order(l, ctx).map(|order| (order, l)))
        .collect();
    applicable.sort_by_key(|(order, _)| *order);
    let applicable: Vec<&UsageLimit> = applicable.into_iter().map(|(_, l)| l).collect();

    for limit in applicable {
        if is_exact_override(limit, ctx) {
            continue;
        }
        // A wildcard deny-all can still be overridden by a more specific
        // allow elsewhere in the set; skip this limit if a same-type,
        // same-scope override with greater-or-equal specificity exists.
        if limit.max_value == 0.0 {
            let overridden = limits.iter().any(|other| {
                other.scope == limit.scope
                    && other.limit_type == limit.limit_type
                    && other.is_unlimited()
                    && applies(other, ctx)
                    && other.specificity() >= limit.specificity()
                    && is_exact_override(other, ctx)
            });
            if overridden {
                continue;
            }
        }

        let start = compute_period_start(now, limit.interval_unit, limit.interval_value);
        let end = compute_period_end(now, start, limit.interval_unit, limit.interval_value);
        // Rolling windows close at `end` inclusive; fixed windows are half-open.
        // The storage contract only speaks half-open, so nudge rolling's upper
        // bound out by a nanosecond to include an event timestamped exactly `end`.
        let query_end = if limit.interval_unit.is_rolling() {
            end + chrono::Duration::nanoseconds(1)
        } else {
            end
        };
        let filters = filters_for_limit(limit);
        let current_usage = storage
            .sum_usage(limit.limit_type, start, query_end, &filters)
            .await?;
        let request_value = limit
            .limit_type
            .request_value(ctx.input_tokens, ctx.completion_tokens, ctx.cost);

        if current_usage + request_value > limit.max_value {
            let reset = reset_instant(limit, start, end);
            let retry_after = (reset - now).num_seconds().max(0);
            return Ok(Decision::Denied(Denial {
                reason: format_reason(limit, current_usage, request_value),
                retry_after_seconds: retry_after,
                reset_instant: reset,
            }));
        }
    }

    Ok(Decision::Allowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use crate::model::{AccountingEntry, LimitType};

    fn dt(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn ctx(model: &str) -> RequestContext {
        RequestContext {
            model: model.to_string(),
            input_tokens: 1,
            completion_tokens: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn scenario_1_rolling_seconds_denial_and_retry_after() {
        let storage = MemoryStorage::new();
        let now = dt("2024-01-01T00:01:00Z");
        for offset in [1, 3, 5] {
            let mut entry = AccountingEntry::new("gpt-4");
            entry.timestamp = now - chrono::Duration::seconds(offset);
            storage.insert_entry(entry).await.unwrap();
        }

        let limit = UsageLimit::new(
            Scope::Global,
            LimitType::Requests,
            3.0,
            IntervalUnit::SecondRolling,
            10,
        );

        let decision = evaluate(&storage, &[limit], &ctx("gpt-4"), now).await.unwrap();
        match decision {
            Decision::Denied(denial) => {
                assert!(denial.reason.contains("GLOBAL limit: 3.00 requests per 10 second_rollings exceeded."));
                assert!(denial.reason.contains("Current usage: 3.00, request: 1.00."));
                // period_start + duration == now for a non-month rolling window,
                // so retry_after is zero.
                assert_eq!(denial.retry_after_seconds, 0);
            }
            Decision::Allowed => panic!("expected denial"),
        }
    }

    #[tokio::test]
    async fn scenario_2_fixed_minute_denial_retry_until_boundary() {
        let storage = MemoryStorage::new();
        for s in [1, 2, 3] {
            let mut entry = AccountingEntry::new("gpt-4");
            entry.timestamp = format!("2024-01-01T00:00:0{s}Z").parse().unwrap();
            entry.username = Some("alice".to_string());
            storage.insert_entry(entry).await.unwrap();
        }

        let limit = UsageLimit::new(Scope::User, LimitType::Requests, 3.0, IntervalUnit::Minute, 1)
            .with_username("alice")
            .with_model("gpt-4");

        let now = dt("2024-01-01T00:00:04Z");
        let request_ctx = RequestContext {
            model: "gpt-4".to_string(),
            username: Some("alice".to_string()),
            input_tokens: 1,
            ..Default::default()
        };
        let decision = evaluate(&storage, &[limit], &request_ctx, now).await.unwrap();
        match decision {
            Decision::Denied(denial) => {
                assert!(denial.reason.contains("USER (user: alice"));
                assert!(denial.reason.contains("limit: 3.00 requests per 1 minute"));
                assert_eq!(denial.retry_after_seconds, 56);
            }
            Decision::Allowed => panic!("expected denial"),
        }
    }

    #[tokio::test]
    async fn scenario_3_account_wide_precedence() {
        let storage = MemoryStorage::new();
        for model in ["model_a", "model_a", "model_b", "model_b"] {
            let mut entry = AccountingEntry::new(model);
            entry.username = Some("alice".to_string());
            entry.timestamp = dt("2024-01-01T00:00:00Z");
            storage.insert_entry(entry).await.unwrap();
        }

        let account_wide = UsageLimit::new(Scope::User, LimitType::Requests, 4.0, IntervalUnit::Minute, 1)
            .with_username("alice");
        let model_specific = UsageLimit::new(Scope::User, LimitType::Requests, 10.0, IntervalUnit::Minute, 1)
            .with_username("alice")
            .with_model("model_a");

        let request_ctx = RequestContext {
            model: "model_c".to_string(),
            username: Some("alice".to_string()),
            input_tokens: 1,
            ..Default::default()
        };
        let decision = evaluate(&storage, &[account_wide, model_specific], &request_ctx, dt("2024-01-01T00:00:01Z"))
            .await
            .unwrap();
        assert!(matches!(decision, Decision::Denied(_)));
    }

    #[tokio::test]
    async fn scenario_5_wildcard_deny_with_concrete_override() {
        let storage = MemoryStorage::new();
        let wildcard_deny = UsageLimit::new(Scope::Model, LimitType::Requests, 0.0, IntervalUnit::Minute, 1)
            .with_model("*");
        let override_allow = UsageLimit::new(Scope::Model, LimitType::Requests, -1.0, IntervalUnit::Minute, 1)
            .with_model("gpt-4");

        let limits = vec![wildcard_deny.clone(), override_allow.clone()];
        let now = dt("2024-01-01T00:00:00Z");

        let allowed = evaluate(&storage, &limits, &ctx("gpt-4"), now).await.unwrap();
        assert_eq!(allowed, Decision::Allowed);

        let denied = evaluate(&storage, &limits, &ctx("gpt-3"), now).await.unwrap();
        match denied {
            Decision::Denied(denial) => assert!(denial.reason.contains("0.00")),
            Decision::Allowed => panic!("expected denial"),
        }
    }
}
