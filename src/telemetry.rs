use serde::{Deserialize, Serialize};

/// Structured events the core emits as it runs. Fire-and-forget: sinks must
/// never block or influence control flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    PlannerRequest {
        upload_bytes: usize,
        latency_ms: u64,
        with_screenshot: bool,
    },
    ParseAnomaly {
        detail: String,
    },
    StepExecuted {
        action: String,
        success: bool,
    },
    VerificationFailed {
        element: String,
        reason: String,
    },
    StagnationRecovery {
        identical_maps: u32,
    },
    StrategicConsult {
        reason: String,
        approaches: usize,
    },
    IterationCompleted {
        index: u32,
    },
    ExtractResolved {
        query: String,
        local: bool,
    },
    FindingShared {
        key: String,
    },
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Default sink: forwards every event to `tracing` at debug level.
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::debug!(target: "uipilot::telemetry", event = %json),
            Err(e) => tracing::warn!(error = %e, "telemetry event serialization failed"),
        }
    }
}

/// Sink that drops everything. Used in tests.
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn record(&self, _event: TelemetryEvent) {}
}

/// Final status of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    DeclaredFailure,
    BudgetExhausted,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub task: String,
    pub status: TaskStatus,
    pub iterations: u32,
    pub duration_ms: u64,
    pub final_message: String,
}

/// Receives the terminal report of a task run. Observers are informational
/// only; the loop never consults them.
pub trait ResultObserver: Send + Sync {
    fn task_finished(&self, report: &TaskReport);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let e = TelemetryEvent::ParseAnomaly {
            detail: "unknown action".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"event\":\"parse_anomaly\""));
    }

    #[test]
    fn report_round_trips() {
        let r = TaskReport {
            task_id: "abc".into(),
            task: "open settings".into(),
            status: TaskStatus::Success,
            iterations: 4,
            duration_ms: 1200,
            final_message: "done".into(),
        };
        let json = serde_json::to_string(&r).unwrap();
        let back: TaskReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, TaskStatus::Success);
        assert_eq!(back.iterations, 4);
    }
}
