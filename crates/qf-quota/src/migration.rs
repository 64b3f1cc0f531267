//! The migration gate: decides, on startup, whether a backend needs its
//! schema created fresh, needs to run migrations to head, or can skip both,
//! using a small local cache file keyed by `(connection identity, revision)`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// What the backend should do on startup, decided by [`MigrationGate::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationAction {
    /// No target tables exist yet: create schema, then stamp the cache at head.
    CreateFreshAndStamp,
    /// The cached revision matches the probed head: nothing to do.
    Skip,
    /// The cache is missing, stale, or the head is unknown: run to head, then stamp.
    RunMigrations,
    /// An in-memory database: always create schema, never touch the cache.
    AlwaysCreateUnconditional,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    connection_identity: String,
    revision: String,
}

/// Reads and writes the local migration-cache file. A missing or corrupt
/// file is treated as "no cached revision", not an error — it is rebuilt on
/// the next successful run.
pub struct MigrationGate {
    cache_path: PathBuf,
}

impl MigrationGate {
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self {
            cache_path: cache_path.into(),
        }
    }

    fn read_cache(&self) -> Option<CacheEntry> {
        let contents = fs::read_to_string(&self.cache_path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %self.cache_path.display(), error = %e, "migration cache file is corrupt; ignoring");
                None
            }
        }
    }

    /// Decide what the backend should do. `probed_head` is `None` when the
    /// head revision could not be determined (e.g. the migration tool is
    /// unreachable).
    pub fn decide(
        &self,
        connection_identity: &str,
        is_in_memory: bool,
        schema_exists: bool,
        probed_head: Option<&str>,
    ) -> MigrationAction {
        if is_in_memory {
            return MigrationAction::AlwaysCreateUnconditional;
        }
        if !schema_exists {
            return MigrationAction::CreateFreshAndStamp;
        }

        let cached = self.read_cache();
        match (cached, probed_head) {
            (Some(entry), Some(head))
                if entry.connection_identity == connection_identity && entry.revision == head =>
            {
                MigrationAction::Skip
            }
            _ => MigrationAction::RunMigrations,
        }
    }

    /// Stamp the cache with `revision` for `connection_identity`. Write
    /// failures are logged and swallowed — the cache is an optimization, not
    /// a source of truth.
    pub fn stamp(&self, connection_identity: &str, revision: &str) {
        let entry = CacheEntry {
            connection_identity: connection_identity.to_string(),
            revision: revision.to_string(),
        };
        if let Some(parent) = self.cache_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "could not create migration cache directory");
                return;
            }
        }
        match serde_json::to_string(&entry) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.cache_path, json) {
                    warn!(path = %self.cache_path.display(), error = %e, "could not write migration cache file");
                }
            }
            Err(e) => warn!(error = %e, "could not serialize migration cache entry"),
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> (MigrationGate, tempfile_path::TempCachePath) {
        let path = tempfile_path::TempCachePath::new();
        (MigrationGate::new(path.path()), path)
    }

    mod tempfile_path {
        use std::path::{Path, PathBuf};
        use std::sync::atomic::{AtomicU64, Ordering};

        static COUNTER: AtomicU64 = AtomicU64::new(0);

        pub struct TempCachePath(PathBuf);

        impl TempCachePath {
            pub fn new() -> Self {
                let n = COUNTER.fetch_add(1, Ordering::Relaxed);
                Self(std::env::temp_dir().join(format!("qf-migration-gate-test-{}-{}.json", std::process::id(), n)))
            }

            pub fn path(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for TempCachePath {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
            }
        }
    }

    #[test]
    fn fresh_database_creates_and_stamps() {
        let (gate, _tmp) = gate();
        let action = gate.decide("conn-a", false, false, None);
        assert_eq!(action, MigrationAction::CreateFreshAndStamp);
    }

    #[test]
    fn in_memory_always_creates_unconditionally() {
        let (gate, _tmp) = gate();
        gate.stamp("conn-a", "head-1");
        let action = gate.decide("conn-a", true, true, Some("head-1"));
        assert_eq!(action, MigrationAction::AlwaysCreateUnconditional);
    }

    #[test]
    fn matching_cached_head_skips() {
        let (gate, _tmp) = gate();
        gate.stamp("conn-a", "head-1");
        let action = gate.decide("conn-a", false, true, Some("head-1"));
        assert_eq!(action, MigrationAction::Skip);
    }

    #[test]
    fn stale_cache_runs_migrations() {
        let (gate, _tmp) = gate();
        gate.stamp("conn-a", "head-0");
        let action = gate.decide("conn-a", false, true, Some("head-1"));
        assert_eq!(action, MigrationAction::RunMigrations);
    }

    #[test]
    fn missing_cache_runs_migrations() {
        let (gate, _tmp) = gate();
        let action = gate.decide("conn-a", false, true, Some("head-1"));
        assert_eq!(action, MigrationAction::RunMigrations);
    }

    #[test]
    fn unknown_head_runs_migrations() {
        let (gate, _tmp) = gate();
        gate.stamp("conn-a", "head-1");
        let action = gate.decide("conn-a", false, true, None);
        assert_eq!(action, MigrationAction::RunMigrations);
    }
}
