//! Core data model: usage limits, accounting entries, and the scopes/types/intervals
//! that parameterize them.

use chrono::{DateTime, Utc};
use qf_common::LimitId;
use serde::{Deserialize, Serialize};

/// The dimension a limit is declared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    Global,
    Model,
    User,
    Caller,
    Project,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "GLOBAL",
            Scope::Model => "MODEL",
            Scope::User => "USER",
            Scope::Caller => "CALLER",
            Scope::Project => "PROJECT",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The quantity a limit bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitType {
    Requests,
    InputTokens,
    OutputTokens,
    TotalTokens,
    Cost,
}

impl LimitType {
    /// The word used when rendering a denial message, e.g. "requests", "cost".
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::Requests => "requests",
            LimitType::InputTokens => "input_tokens",
            LimitType::OutputTokens => "output_tokens",
            LimitType::TotalTokens => "total_tokens",
            LimitType::Cost => "cost",
        }
    }

    /// The value a single request contributes to usage of this type.
    pub fn request_value(&self, input_tokens: i64, completion_tokens: i64, cost: f64) -> f64 {
        match self {
            LimitType::Requests => 1.0,
            LimitType::InputTokens => input_tokens as f64,
            LimitType::OutputTokens => completion_tokens as f64,
            LimitType::TotalTokens => (input_tokens + completion_tokens) as f64,
            LimitType::Cost => cost,
        }
    }
}

impl std::fmt::Display for LimitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The unit a limit's window is measured in — fixed (calendar-aligned) or rolling
/// (sliding, ending at `now`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    SecondRolling,
    MinuteRolling,
    HourRolling,
    DayRolling,
    WeekRolling,
    MonthRolling,
}

impl IntervalUnit {
    pub fn is_rolling(&self) -> bool {
        matches!(
            self,
            IntervalUnit::SecondRolling
                | IntervalUnit::MinuteRolling
                | IntervalUnit::HourRolling
                | IntervalUnit::DayRolling
                | IntervalUnit::WeekRolling
                | IntervalUnit::MonthRolling
        )
    }

    /// Lowercase rendering used in denial messages, e.g. "second_rolling", "month".
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalUnit::Second => "second",
            IntervalUnit::Minute => "minute",
            IntervalUnit::Hour => "hour",
            IntervalUnit::Day => "day",
            IntervalUnit::Week => "week",
            IntervalUnit::Month => "month",
            IntervalUnit::SecondRolling => "second_rolling",
            IntervalUnit::MinuteRolling => "minute_rolling",
            IntervalUnit::HourRolling => "hour_rolling",
            IntervalUnit::DayRolling => "day_rolling",
            IntervalUnit::WeekRolling => "week_rolling",
            IntervalUnit::MonthRolling => "month_rolling",
        }
    }
}

impl std::fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A usage limit (rule). `max_value < 0` means unlimited/override-allow;
/// `max_value == 0` means deny all matching requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLimit {
    pub id: Option<LimitId>,
    pub scope: Scope,
    pub limit_type: LimitType,
    pub max_value: f64,
    pub interval_unit: IntervalUnit,
    pub interval_value: i64,
    pub model: Option<String>,
    pub username: Option<String>,
    pub caller_name: Option<String>,
    pub project_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UsageLimit {
    /// Build a limit with every dimensional field unconstrained; callers narrow
    /// it with the `with_*` setters.
    pub fn new(scope: Scope, limit_type: LimitType, max_value: f64, interval_unit: IntervalUnit, interval_value: i64) -> Self {
        Self {
            id: None,
            scope,
            limit_type,
            max_value,
            interval_unit,
            interval_value,
            model: None,
            username: None,
            caller_name: None,
            project_name: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_caller_name(mut self, caller_name: impl Into<String>) -> Self {
        self.caller_name = Some(caller_name.into());
        self
    }

    pub fn with_project_name(mut self, project_name: impl Into<String>) -> Self {
        self.project_name = Some(project_name.into());
        self
    }

    /// Whether this is an override-allow limit (negative max).
    pub fn is_unlimited(&self) -> bool {
        self.max_value < 0.0
    }

    /// The number of dimensional fields this limit constrains beyond its scope.
    /// Used to rank specificity when an override and a wildcard both match.
    pub fn specificity(&self) -> u8 {
        [&self.model, &self.username, &self.caller_name, &self.project_name]
            .iter()
            .filter(|f| f.as_deref().map(|v| v != "*").unwrap_or(false))
            .count() as u8
    }
}

/// A single recorded unit of LLM usage. Append-only; never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountingEntry {
    pub id: Option<qf_common::EntryId>,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub username: Option<String>,
    pub caller_name: Option<String>,
    pub project: Option<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub local_prompt_tokens: Option<i64>,
    pub local_completion_tokens: Option<i64>,
    pub local_total_tokens: Option<i64>,
    pub cached_tokens: i64,
    pub reasoning_tokens: i64,
    pub cost: f64,
    pub execution_time: f64,
}

impl AccountingEntry {
    /// Build an entry for `model` with `timestamp` defaulted to the current UTC
    /// instant and every other field at its zero/empty value.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            model: model.into(),
            username: None,
            caller_name: None,
            project: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            local_prompt_tokens: None,
            local_completion_tokens: None,
            local_total_tokens: None,
            cached_tokens: 0,
            reasoning_tokens: 0,
            cost: 0.0,
            execution_time: 0.0,
        }
    }
}

/// A registered project or user name, tracked for membership enforcement and
/// for the CLI's directory-management surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub ou_name: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_enabled_at: DateTime<Utc>,
    pub last_disabled_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

impl DirectoryEntry {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            ou_name: None,
            email: None,
            created_at: now,
            last_enabled_at: now,
            last_disabled_at: None,
            enabled: true,
        }
    }
}

/// The request context a quota check or accounting insert is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub model: String,
    pub username: Option<String>,
    pub caller_name: Option<String>,
    pub project: Option<String>,
    pub input_tokens: i64,
    pub completion_tokens: i64,
    pub cost: f64,
}
