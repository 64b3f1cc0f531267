//! The denial cache: a pure optimization that lets a hot, repeatedly-denied
//! key skip the evaluator (and all storage I/O) until its reset instant
//! passes. A cold process must behave identically to a warm one, modulo call
//! counts — this cache changes nothing it returns, only how the answer is
//! produced.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::evaluator::Denial;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DenialKey {
    model: String,
    username: Option<String>,
    caller_name: Option<String>,
    project_name: Option<String>,
}

/// A fixed-capacity map from `(model, username, caller_name, project_name)`
/// to a still-live denial. Oldest entries are evicted once `capacity` is
/// exceeded — a simple bound, not an LRU; operators size it to the number of
/// concurrently denied keys they expect.
pub struct DenialCache {
    capacity: usize,
    entries: HashMap<DenialKey, Denial>,
    insertion_order: Vec<DenialKey>,
}

impl DenialCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    fn key(model: &str, username: Option<&str>, caller_name: Option<&str>, project_name: Option<&str>) -> DenialKey {
        DenialKey {
            model: model.to_string(),
            username: username.map(str::to_string),
            caller_name: caller_name.map(str::to_string),
            project_name: project_name.map(str::to_string),
        }
    }

    /// Consult the cache for a live denial, evicting it if its reset instant
    /// has passed. `retry_after_seconds` is recomputed against `now` rather
    /// than replayed from record time, so it shrinks across repeated lookups.
    pub fn lookup(
        &mut self,
        model: &str,
        username: Option<&str>,
        caller_name: Option<&str>,
        project_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<Denial> {
        let key = Self::key(model, username, caller_name, project_name);
        match self.entries.get(&key) {
            Some(denial) if now < denial.reset_instant => Some(Denial {
                retry_after_seconds: (denial.reset_instant - now).num_seconds().max(0),
                ..denial.clone()
            }),
            Some(_) => {
                self.entries.remove(&key);
                self.insertion_order.retain(|k| k != &key);
                None
            }
            None => None,
        }
    }

    /// Record a fresh denial, evicting the oldest entry if at capacity.
    pub fn record(
        &mut self,
        model: &str,
        username: Option<&str>,
        caller_name: Option<&str>,
        project_name: Option<&str>,
        denial: Denial,
    ) {
        let key = Self::key(model, username, caller_name, project_name);
        if !self.entries.contains_key(&key) {
            if self.entries.len() >= self.capacity {
                if let Some(oldest) = self.insertion_order.first().cloned() {
                    self.entries.remove(&oldest);
                    self.insertion_order.remove(0);
                }
            }
            self.insertion_order.push(key.clone());
        }
        self.entries.insert(key, denial);
    }

    /// Evict a key's cached denial (e.g. when the evaluator allows where it
    /// previously denied).
    pub fn evict(&mut self, model: &str, username: Option<&str>, caller_name: Option<&str>, project_name: Option<&str>) {
        let key = Self::key(model, username, caller_name, project_name);
        self.entries.remove(&key);
        self.insertion_order.retain(|k| k != &key);
    }
}
