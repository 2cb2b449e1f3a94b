//! Runs two control loops over split sub-regions of one display, sharing
//! findings through a [`Blackboard`]. Each loop keeps its own planner
//! conversation and terminal status; neither is aborted when its peer
//! finishes, it only sees the peer's completion flag in its prompts.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::LoopConfig;
use crate::engine::blackboard::Blackboard;
use crate::engine::engine::{ControlLoop, LoopCapabilities};
use crate::planner::strategy::ParallelDecomposition;
use crate::telemetry::{TaskReport, TaskStatus};

/// A named sub-region of the display. The origin offsets every gesture the
/// loop emits; the capability objects are expected to perceive only this
/// region.
#[derive(Debug, Clone)]
pub struct SubRegion {
    pub label: String,
    pub origin: (i32, i32),
}

impl SubRegion {
    pub fn new(label: impl Into<String>, origin: (i32, i32)) -> Self {
        Self { label: label.into(), origin }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatedReport {
    pub primary: TaskReport,
    pub secondary: TaskReport,
}

impl CoordinatedReport {
    /// Success only when both loops succeeded; otherwise the worse of the
    /// two statuses, with errors dominating.
    pub fn overall_status(&self) -> TaskStatus {
        let rank = |s: TaskStatus| match s {
            TaskStatus::Success => 0,
            TaskStatus::DeclaredFailure => 1,
            TaskStatus::BudgetExhausted => 2,
            TaskStatus::Stopped => 3,
            TaskStatus::Error => 4,
        };
        if rank(self.secondary.status) > rank(self.primary.status) {
            self.secondary.status
        } else {
            self.primary.status
        }
    }
}

pub struct Coordinator {
    blackboard: Arc<Blackboard>,
    primary: ControlLoop,
    secondary: ControlLoop,
}

impl Coordinator {
    pub fn new(
        primary_caps: LoopCapabilities,
        primary_region: SubRegion,
        secondary_caps: LoopCapabilities,
        secondary_region: SubRegion,
        config: LoopConfig,
    ) -> Self {
        let blackboard = Arc::new(Blackboard::new());
        let primary = ControlLoop::new(primary_caps, config.clone())
            .with_blackboard(blackboard.clone())
            .with_sub_region(primary_region.label, primary_region.origin);
        let secondary = ControlLoop::new(secondary_caps, config)
            .with_blackboard(blackboard.clone())
            .with_sub_region(secondary_region.label, secondary_region.origin);
        Self { blackboard, primary, secondary }
    }

    pub fn blackboard(&self) -> Arc<Blackboard> {
        self.blackboard.clone()
    }

    /// Stop handles for the two loops, primary first. Storing `true` stops a
    /// loop at its next checkpoint.
    pub fn stop_handles(&self) -> (Arc<AtomicBool>, Arc<AtomicBool>) {
        (self.primary.stop_handle(), self.secondary.stop_handle())
    }

    /// Run both loops to their terminal statuses concurrently.
    pub async fn run(&mut self, primary_task: &str, secondary_task: &str) -> CoordinatedReport {
        tracing::info!(primary_task, secondary_task, "coordinated run starting");
        let (primary, secondary) = futures_util::future::join(
            self.primary.run(primary_task),
            self.secondary.run(secondary_task),
        )
        .await;
        let report = CoordinatedReport { primary, secondary };
        tracing::info!(status = ?report.overall_status(), "coordinated run finished");
        report
    }

    /// Run the two sub-tasks of a detected decomposition.
    pub async fn run_decomposed(
        &mut self,
        decomposition: &ParallelDecomposition,
    ) -> CoordinatedReport {
        self.run(&decomposition.primary_task, &decomposition.secondary_task)
            .await
    }
}
