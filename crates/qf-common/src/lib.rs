//! # qf-common
//!
//! Shared types and utilities for the quota accounting engine:
//! - [`error`]: the unified error type returned across the crate workspace.
//! - [`ids`]: surrogate identifiers for accounting rows and limits.
//! - [`config`] (feature `config`): layered configuration loading.

pub mod error;
pub mod ids;

#[cfg(feature = "config")]
pub mod config;

pub use error::{QfError, QfResult};
pub use ids::{EntryId, LimitId};

#[cfg(feature = "config")]
pub use config::{load_config, load_engine_config, EngineConfig, ObservabilityConfig, QuotaConfig, StorageConfig};
