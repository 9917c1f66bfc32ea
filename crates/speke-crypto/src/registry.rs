//! Process-wide engine id numbering.
//!
//! Every engine appends a per-id counter to the id its caller supplied, so
//! two engines constructed with the same id still present distinct
//! identities on the wire and a dropped session cannot be restored by
//! replaying an old one. The counter lives for the process and is bumped
//! under a mutex, so concurrent constructions with the same id are safe.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// Registry of per-id construction counters.
pub struct IdRegistry {
    counters: Mutex<HashMap<String, u64>>,
}

impl IdRegistry {
    /// Create an empty registry.
    ///
    /// Engine construction uses the process-global registry from
    /// [`global`]; separate instances exist for tests that need counters
    /// starting from a known value.
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Increment and fetch the counter for `id`.
    pub fn next_count(&self, id: &str) -> u64 {
        let mut counters = self.counters.lock().unwrap();
        let count = counters.entry(id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Produce the numbered form of `id`: `"<id>-<count>"`.
    pub fn numbered_id(&self, id: &str) -> String {
        format!("{}-{}", id, self.next_count(id))
    }
}

impl Default for IdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-global registry used by engine construction.
pub fn global() -> &'static IdRegistry {
    static GLOBAL: OnceLock<IdRegistry> = OnceLock::new();
    GLOBAL.get_or_init(IdRegistry::new)
}
