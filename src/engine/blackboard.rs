//! Shared findings blackboard for coordinated loops.
//!
//! Key→value, last-write-wins, no cross-loop ordering guarantee. Loops read
//! a snapshot at prompt-build time rather than subscribing live, so up to one
//! iteration of staleness is accepted by design.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct Blackboard {
    entries: Mutex<BTreeMap<String, String>>,
    any_complete: AtomicBool,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().expect("blackboard poisoned");
        tracing::debug!(key, value, "blackboard write");
        entries.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("blackboard poisoned")
            .get(key)
            .cloned()
    }

    /// Point-in-time copy, ordered by key for deterministic prompt rendering.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.lock().expect("blackboard poisoned").clone()
    }

    /// Render the snapshot for a prompt. `None` when the board is empty.
    pub fn prompt_note(&self) -> Option<String> {
        let snap = self.snapshot();
        if snap.is_empty() {
            return None;
        }
        Some(
            snap.iter()
                .map(|(k, v)| format!("- {k}: {v}\n"))
                .collect::<String>(),
        )
    }

    pub fn mark_complete(&self) {
        self.any_complete.store(true, Ordering::SeqCst);
    }

    pub fn any_complete(&self) -> bool {
        self.any_complete.load(Ordering::SeqCst)
    }
}
