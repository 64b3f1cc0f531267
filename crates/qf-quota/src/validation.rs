//! Validation of accounting entries before they reach storage.
//!
//! The facade validates before any I/O (§7 of the design: `ValidationError`
//! is raised before the backend is touched). Configurable to either fail
//! fast on the first problem or collect everything wrong with an entry.

use chrono::{Duration, Utc};
use thiserror::Error;

use crate::model::AccountingEntry;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("model is required and must be non-empty")]
    EmptyModel,

    #[error("model exceeds maximum length of {max} characters")]
    ModelTooLong { max: usize },

    #[error("{field} must be non-negative, got {value}")]
    NegativeCounter { field: &'static str, value: i64 },

    #[error("cost must be non-negative, got {0}")]
    NegativeCost(f64),

    #[error("timestamp {timestamp} is too far in the future (max {max_seconds}s ahead)")]
    TimestampTooFuture { timestamp: chrono::DateTime<Utc>, max_seconds: i64 },

    #[error("multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub max_model_length: usize,
    /// Clock-skew tolerance for a caller-supplied timestamp.
    pub max_future_seconds: i64,
    pub collect_all_errors: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_model_length: 255,
            max_future_seconds: 60,
            collect_all_errors: false,
        }
    }
}

impl ValidationConfig {
    pub fn lenient() -> Self {
        Self {
            max_model_length: 4096,
            max_future_seconds: 3600,
            collect_all_errors: true,
        }
    }
}

pub struct EntryValidator {
    config: ValidationConfig,
}

impl EntryValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn default_validator() -> Self {
        Self::new(ValidationConfig::default())
    }

    pub fn validate(&self, entry: &AccountingEntry) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        macro_rules! fail_or_collect {
            ($err:expr) => {{
                let err = $err;
                if !self.config.collect_all_errors {
                    return Err(err);
                }
                errors.push(err);
            }};
        }

        if entry.model.trim().is_empty() {
            fail_or_collect!(ValidationError::EmptyModel);
        } else if entry.model.len() > self.config.max_model_length {
            fail_or_collect!(ValidationError::ModelTooLong {
                max: self.config.max_model_length,
            });
        }

        for (field, value) in [
            ("prompt_tokens", entry.prompt_tokens),
            ("completion_tokens", entry.completion_tokens),
            ("total_tokens", entry.total_tokens),
        ] {
            if let Some(v) = value {
                if v < 0 {
                    fail_or_collect!(ValidationError::NegativeCounter { field, value: v });
                }
            }
        }
        if entry.cached_tokens < 0 {
            fail_or_collect!(ValidationError::NegativeCounter {
                field: "cached_tokens",
                value: entry.cached_tokens,
            });
        }
        if entry.reasoning_tokens < 0 {
            fail_or_collect!(ValidationError::NegativeCounter {
                field: "reasoning_tokens",
                value: entry.reasoning_tokens,
            });
        }

        if entry.cost < 0.0 {
            fail_or_collect!(ValidationError::NegativeCost(entry.cost));
        }

        let max_future = Utc::now() + Duration::seconds(self.config.max_future_seconds);
        if entry.timestamp > max_future {
            fail_or_collect!(ValidationError::TimestampTooFuture {
                timestamp: entry.timestamp,
                max_seconds: self.config.max_future_seconds,
            });
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_model_is_rejected() {
        let validator = EntryValidator::default_validator();
        let entry = AccountingEntry::new("");
        assert_eq!(validator.validate(&entry), Err(ValidationError::EmptyModel));
    }

    #[test]
    fn blank_model_is_rejected() {
        let validator = EntryValidator::default_validator();
        let entry = AccountingEntry::new("   ");
        assert_eq!(validator.validate(&entry), Err(ValidationError::EmptyModel));
    }

    #[test]
    fn negative_token_counts_are_rejected() {
        let validator = EntryValidator::default_validator();
        let mut entry = AccountingEntry::new("gpt-4");
        entry.prompt_tokens = Some(-1);
        assert!(matches!(validator.validate(&entry), Err(ValidationError::NegativeCounter { field: "prompt_tokens", value: -1 })));
    }

    #[test]
    fn valid_entry_passes() {
        let validator = EntryValidator::default_validator();
        let mut entry = AccountingEntry::new("gpt-4");
        entry.prompt_tokens = Some(10);
        entry.completion_tokens = Some(5);
        entry.cost = 0.01;
        assert!(validator.validate(&entry).is_ok());
    }

    #[test]
    fn collect_all_errors_gathers_everything() {
        let validator = EntryValidator::new(ValidationConfig {
            collect_all_errors: true,
            ..ValidationConfig::default()
        });
        let mut entry = AccountingEntry::new("");
        entry.prompt_tokens = Some(-1);
        entry.cost = -5.0;
        match validator.validate(&entry) {
            Err(ValidationError::Multiple(errs)) => assert_eq!(errs.len(), 3),
            other => panic!("expected Multiple, got {other:?}"),
        }
    }
}
