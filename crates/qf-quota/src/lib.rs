//! # qf-quota
//!
//! Usage accounting and quota enforcement for LLM API calls.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Accounting**: append-only recording of LLM usage (tokens, cost, execution time).
//! - **Quota enforcement**: per-scope, per-interval limits with calendar-aligned and
//!   rolling windows, evaluated in a fixed, test-observable order.
//! - **Directory management**: project/user registration for optional membership
//!   enforcement.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            qf-quota                              │
//! │  ┌────────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐  │
//! │  │ Accounting │ → │  Quota    │ → │ Evaluator │ → │  Storage  │  │
//! │  │   facade   │   │  Service  │   │  (period  │   │  backend  │  │
//! │  └────────────┘   └───────────┘   │ + limits) │   └───────────┘  │
//! │                          ↓        └───────────┘                 │
//! │                   ┌────────────┐                                │
//! │                   │  Denial /  │                                │
//! │                   │  limits    │                                │
//! │                   │  caches    │                                │
//! │                   └────────────┘                                │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod accounting;
pub mod cache;
pub mod denial_cache;
pub mod directory;
pub mod evaluator;
pub mod memory;
pub mod migration;
pub mod model;
pub mod period;
pub mod quota_service;
pub mod storage;
pub mod validation;

pub use accounting::{Accounting, RemainingLimit, UsageRecord};
pub use directory::Directory;
pub use evaluator::{Decision, Denial};
pub use memory::MemoryStorage;
pub use migration::{MigrationAction, MigrationGate};
pub use model::{
    AccountingEntry, DirectoryEntry, IntervalUnit, LimitType, RequestContext, Scope, UsageLimit,
};
pub use quota_service::QuotaService;
pub use storage::{FieldFilter, Storage, UsageFilters};
pub use validation::{EntryValidator, ValidationConfig, ValidationError};
