use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Lifecycle states of one control loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Running { task: String },
    Completed { message: String },
    Failed { message: String },
    Stopped,
    BudgetExhausted,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoopState::Idle | LoopState::Running { .. })
    }
}

/// Kinds of failure recorded to the failure context. Verification failures
/// are kept distinct from execution failures for diagnosis quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Execution,
    Verification,
    Stagnation,
}

/// Bounded ring of recent failure descriptions. Biases prompts and feeds
/// strategic re-planning; old entries fall off the front.
#[derive(Debug, Clone, Default)]
pub struct FailureContext {
    entries: VecDeque<(FailureKind, String)>,
}

impl FailureContext {
    const CAPACITY: usize = 8;

    pub fn record(&mut self, kind: FailureKind, description: impl Into<String>) {
        if self.entries.len() == Self::CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back((kind, description.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Descriptions, oldest first, kind-annotated for the prompt.
    pub fn descriptions(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(kind, d)| match kind {
                FailureKind::Execution => d.clone(),
                FailureKind::Verification => format!("verification: {d}"),
                FailureKind::Stagnation => format!("stagnation: {d}"),
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
