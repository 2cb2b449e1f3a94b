//! Executes a validated plan against the actuator, one dispatch per step,
//! short-circuiting on the first failure so the loop re-plans from fresh
//! perception instead of running a stale tail.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::blackboard::Blackboard;
use crate::executor::actuator::Actuator;
use crate::executor::extract::extract_local;
use crate::perception::types::{EnvironmentMap, Region};
use crate::planner::plan::{ActionKind, Plan, PlanStep, SwipeDirection};
use crate::planner::transport::PlannerTransport;
use crate::planner::types::ConversationTurn;
use crate::telemetry::{TelemetryEvent, TelemetrySink};

/// Phrases in a COMPLETE description that mark a declared failure. Used for
/// messaging only; the loop still transitions to COMPLETED.
const FAILURE_PHRASES: &[&str] = &[
    "unable", "cannot", "can't", "could not", "couldn't", "failed", "not possible", "impossible",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Success(String),
    DeclaredFailure(String),
}

#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// Steps that ran before the plan ended, failed, or was stopped.
    pub executed: usize,
    pub failure: Option<String>,
    pub completion: Option<Completion>,
    pub stopped: bool,
}

pub struct StepExecutor {
    actuator: Arc<dyn Actuator>,
    transport: Arc<dyn PlannerTransport>,
    telemetry: Arc<dyn TelemetrySink>,
    blackboard: Option<Arc<Blackboard>>,
    /// Origin of this loop's sub-region in global coordinates.
    sub_origin: (i32, i32),
    step_settle: Duration,
}

impl StepExecutor {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        transport: Arc<dyn PlannerTransport>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            actuator,
            transport,
            telemetry,
            blackboard: None,
            sub_origin: (0, 0),
            step_settle: Duration::from_millis(800),
        }
    }

    pub fn with_blackboard(mut self, blackboard: Arc<Blackboard>) -> Self {
        self.blackboard = Some(blackboard);
        self
    }

    pub fn with_sub_origin(mut self, origin: (i32, i32)) -> Self {
        self.sub_origin = origin;
        self
    }

    pub fn with_step_settle(mut self, settle: Duration) -> Self {
        self.step_settle = settle;
        self
    }

    /// Run the plan's steps in order. Stops at the first failure, COMPLETE,
    /// raised stop flag, or end of plan.
    pub async fn execute_plan(
        &self,
        plan: &Plan,
        map: &EnvironmentMap,
        turns: &mut Vec<ConversationTurn>,
        stop: &AtomicBool,
    ) -> ExecutionResult {
        let mut result = ExecutionResult::default();
        for (index, step) in plan.steps.iter().enumerate() {
            if stop.load(Ordering::Relaxed) {
                result.stopped = true;
                break;
            }

            let outcome = self.execute_step(step, map, turns).await;
            result.executed += 1;
            let success = outcome.is_ok();
            self.telemetry.record(TelemetryEvent::StepExecuted {
                action: step.action.as_str().to_string(),
                success,
            });

            match outcome {
                Ok(Some(completion)) => {
                    result.completion = Some(completion);
                    break;
                }
                Ok(None) => {
                    tracing::debug!(index, action = step.action.as_str(), "step succeeded");
                }
                Err(reason) => {
                    tracing::warn!(index, action = step.action.as_str(), reason = %reason, "step failed, aborting plan");
                    result.failure = Some(reason);
                    break;
                }
            }

            if index + 1 < plan.steps.len() {
                tokio::time::sleep(self.step_settle).await;
            }
        }
        result
    }

    /// One step. `Ok(Some(_))` ends the task, `Ok(None)` continues,
    /// `Err` aborts the remaining plan.
    async fn execute_step(
        &self,
        step: &PlanStep,
        map: &EnvironmentMap,
        turns: &mut Vec<ConversationTurn>,
    ) -> Result<Option<Completion>, String> {
        match step.action {
            ActionKind::Click => {
                let (x, y) = self.resolve_point(step, map)?;
                if self.actuator.tap(x, y).await {
                    Ok(None)
                } else {
                    Err(format!("tap at ({x},{y}) was not delivered"))
                }
            }
            ActionKind::LongPress => {
                let (x, y) = self.resolve_point(step, map)?;
                let duration = step.duration_ms.unwrap_or(600);
                if self.actuator.long_press(x, y, duration).await {
                    Ok(None)
                } else {
                    Err(format!("long press at ({x},{y}) was not delivered"))
                }
            }
            ActionKind::Type => {
                let text = step
                    .text
                    .as_deref()
                    .ok_or_else(|| "type step without text".to_string())?;
                // Focus the field first when the planner named one.
                if step.element.is_some() {
                    let (x, y) = self.resolve_point(step, map)?;
                    if !self.actuator.tap(x, y).await {
                        return Err(format!("focus tap at ({x},{y}) was not delivered"));
                    }
                }
                if self.actuator.type_text(text).await {
                    Ok(None)
                } else {
                    Err("text entry failed".into())
                }
            }
            ActionKind::Swipe => {
                let direction = step
                    .direction
                    .ok_or_else(|| "swipe step without direction".to_string())?;
                let (x1, y1, x2, y2) = self.swipe_line(direction, map);
                let duration = step.duration_ms.unwrap_or(300);
                if self.actuator.swipe(x1, y1, x2, y2, duration).await {
                    Ok(None)
                } else {
                    Err(format!("swipe {direction:?} was not delivered"))
                }
            }
            ActionKind::Back => {
                if self.actuator.back().await {
                    Ok(None)
                } else {
                    Err("back navigation failed".into())
                }
            }
            ActionKind::Home => {
                if self.actuator.home().await {
                    Ok(None)
                } else {
                    Err("home navigation failed".into())
                }
            }
            ActionKind::Wait => {
                let duration = step.duration_ms.unwrap_or(1000).min(10_000);
                tokio::time::sleep(Duration::from_millis(duration)).await;
                Ok(None)
            }
            ActionKind::Complete => {
                let message = if step.description.is_empty() {
                    "task complete".to_string()
                } else {
                    step.description.clone()
                };
                Ok(Some(classify_completion(&message)))
            }
            ActionKind::OpenTarget => {
                let app = step
                    .app
                    .as_deref()
                    .or(step.text.as_deref())
                    .ok_or_else(|| "open_target step without app identifier".to_string())?;
                if self.actuator.open_target(app).await {
                    Ok(None)
                } else {
                    Err(format!("could not open {app:?}"))
                }
            }
            ActionKind::DismissInputMethod => {
                if self.actuator.dismiss_input_method().await {
                    Ok(None)
                } else {
                    Err("input method did not dismiss".into())
                }
            }
            ActionKind::Submit => {
                if self.actuator.submit().await {
                    Ok(None)
                } else {
                    Err("submit failed".into())
                }
            }
            ActionKind::Extract => self.execute_extract(step, map, turns).await.map(|_| None),
            ActionKind::ShareFinding => {
                let key = step
                    .key
                    .as_deref()
                    .ok_or_else(|| "share_finding step without key".to_string())?;
                let value = step.value.clone().unwrap_or_default();
                match &self.blackboard {
                    Some(board) => {
                        board.set(key, &value);
                        self.telemetry
                            .record(TelemetryEvent::FindingShared { key: key.to_string() });
                    }
                    None => {
                        tracing::warn!(key, "share_finding without a shared blackboard; dropped");
                    }
                }
                Ok(None)
            }
        }
    }

    /// Resolve the step's target region to a safe interior point in global
    /// coordinates.
    fn resolve_point(&self, step: &PlanStep, map: &EnvironmentMap) -> Result<(i32, i32), String> {
        let id = step
            .element
            .as_deref()
            .ok_or_else(|| format!("{} step without element id", step.action.as_str()))?;
        let region: &Region = map
            .region(id)
            .ok_or_else(|| format!("element {id:?} not present on the current screen"))?;
        let (x, y) = region.bounds.safe_point();
        Ok((x + self.sub_origin.0, y + self.sub_origin.1))
    }

    /// Swipe start/end from the named direction, the environment center, and
    /// one-third-height travel, offset into global coordinates.
    fn swipe_line(&self, direction: SwipeDirection, map: &EnvironmentMap) -> (i32, i32, i32, i32) {
        let (cx, cy) = map.center();
        let (cx, cy) = (cx + self.sub_origin.0, cy + self.sub_origin.1);
        let travel = map.height / 3;
        let half = travel / 2;
        match direction {
            SwipeDirection::Up => (cx, cy + half, cx, cy - half),
            SwipeDirection::Down => (cx, cy - half, cx, cy + half),
            SwipeDirection::Left => (cx + half, cy, cx - half, cy),
            SwipeDirection::Right => (cx - half, cy, cx + half, cy),
        }
    }

    /// EXTRACT: local strategies first, planner fallback only when they all
    /// miss. The answer lands in the conversation as a synthetic user turn;
    /// the plan keeps going.
    async fn execute_extract(
        &self,
        step: &PlanStep,
        map: &EnvironmentMap,
        turns: &mut Vec<ConversationTurn>,
    ) -> Result<(), String> {
        let query = step
            .query
            .as_deref()
            .ok_or_else(|| "extract step without query".to_string())?;

        let (answer, local) = match extract_local(map, query) {
            Some(answer) => (answer, true),
            None => {
                let prompt = format!(
                    "Answer the query from this screen content only. Reply with the answer text, nothing else.\n\n## Screen\n{}\n## Query\n{query}",
                    map.canonical_text(),
                );
                let raw = self
                    .transport
                    .complete(&[ConversationTurn::user(prompt)], "You extract facts from UI text.")
                    .await
                    .map_err(|e| format!("extract fallback failed: {e}"))?;
                (raw.trim().to_string(), false)
            }
        };

        tracing::info!(query, local, answer = %answer, "extract resolved");
        self.telemetry.record(TelemetryEvent::ExtractResolved {
            query: query.to_string(),
            local,
        });
        turns.push(ConversationTurn::user(format!(
            "Extracted answer for {query:?}: {answer}"
        )));
        Ok(())
    }
}

/// Declared-success vs declared-failure, by phrase match on the COMPLETE
/// description.
pub fn classify_completion(message: &str) -> Completion {
    let lower = message.to_ascii_lowercase();
    if FAILURE_PHRASES.iter().any(|p| lower.contains(p)) {
        Completion::DeclaredFailure(message.to_string())
    } else {
        Completion::Success(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::errors::{UiPilotError, UiPilotResult};
    use crate::perception::types::{Bounds, Provenance, RegionKind};
    use crate::telemetry::NullTelemetry;

    #[derive(Default)]
    struct RecordingActuator {
        calls: Mutex<Vec<String>>,
        fail_taps: bool,
    }

    #[async_trait]
    impl Actuator for RecordingActuator {
        async fn tap(&self, x: i32, y: i32) -> bool {
            self.calls.lock().unwrap().push(format!("tap {x},{y}"));
            !self.fail_taps
        }
        async fn long_press(&self, x: i32, y: i32, d: u64) -> bool {
            self.calls.lock().unwrap().push(format!("long_press {x},{y},{d}"));
            true
        }
        async fn type_text(&self, text: &str) -> bool {
            self.calls.lock().unwrap().push(format!("type {text}"));
            true
        }
        async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, _d: u64) -> bool {
            self.calls.lock().unwrap().push(format!("swipe {x1},{y1}->{x2},{y2}"));
            true
        }
        async fn back(&self) -> bool {
            self.calls.lock().unwrap().push("back".into());
            true
        }
        async fn home(&self) -> bool {
            true
        }
        async fn open_target(&self, id: &str) -> bool {
            self.calls.lock().unwrap().push(format!("open {id}"));
            true
        }
        async fn dismiss_input_method(&self) -> bool {
            true
        }
        async fn submit(&self) -> bool {
            true
        }
    }

    struct NoTransport;

    #[async_trait]
    impl PlannerTransport for NoTransport {
        async fn complete(
            &self,
            _turns: &[ConversationTurn],
            _instructions: &str,
        ) -> UiPilotResult<String> {
            Err(UiPilotError::Planner("offline".into()))
        }
    }

    struct FixedTransport(String);

    #[async_trait]
    impl PlannerTransport for FixedTransport {
        async fn complete(
            &self,
            _turns: &[ConversationTurn],
            _instructions: &str,
        ) -> UiPilotResult<String> {
            Ok(self.0.clone())
        }
    }

    fn search_map() -> EnvironmentMap {
        EnvironmentMap {
            regions: vec![Region {
                id: "input_search".into(),
                kind: RegionKind::Input,
                text: "Search".into(),
                bounds: Bounds::new(100, 200, 500, 280),
                clickable: true,
                provenance: Provenance::Structural,
            }],
            width: 1080,
            height: 1920,
            rich_content: false,
            input_method_visible: false,
        }
    }

    fn executor(actuator: Arc<RecordingActuator>) -> StepExecutor {
        StepExecutor::new(actuator, Arc::new(NoTransport), Arc::new(NullTelemetry))
            .with_step_settle(Duration::from_millis(0))
    }

    fn click_plan(element: &str) -> Plan {
        let mut step = PlanStep::bare(ActionKind::Click);
        step.element = Some(element.into());
        step.description = "tap search box".into();
        Plan {
            steps: vec![step],
            reasoning: String::new(),
            confidence: crate::planner::plan::Confidence::Medium,
            progress: String::new(),
            relevant_apps: Vec::new(),
        }
    }

    #[tokio::test]
    async fn click_resolves_safe_point_and_dispatches_tap() {
        let actuator = Arc::new(RecordingActuator::default());
        let exec = executor(actuator.clone());
        let mut turns = Vec::new();
        let stop = AtomicBool::new(false);
        let result = exec
            .execute_plan(&click_plan("input_search"), &search_map(), &mut turns, &stop)
            .await;
        assert!(result.failure.is_none());
        assert_eq!(result.executed, 1);
        // Safe point of (100,200,500,280) is its center.
        assert_eq!(actuator.calls.lock().unwrap()[0], "tap 300,240");
    }

    #[tokio::test]
    async fn missing_element_fails_and_short_circuits() {
        let actuator = Arc::new(RecordingActuator::default());
        let exec = executor(actuator.clone());
        let mut plan = click_plan("button_ghost");
        plan.steps.push(PlanStep::bare(ActionKind::Back));
        let mut turns = Vec::new();
        let stop = AtomicBool::new(false);
        let result = exec.execute_plan(&plan, &search_map(), &mut turns, &stop).await;
        assert!(result.failure.as_deref().unwrap().contains("button_ghost"));
        assert_eq!(result.executed, 1);
        assert!(actuator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn swipe_uses_center_and_third_height_travel() {
        let actuator = Arc::new(RecordingActuator::default());
        let exec = executor(actuator.clone());
        let mut step = PlanStep::bare(ActionKind::Swipe);
        step.direction = Some(SwipeDirection::Up);
        let plan = Plan {
            steps: vec![step],
            reasoning: String::new(),
            confidence: crate::planner::plan::Confidence::Medium,
            progress: String::new(),
            relevant_apps: Vec::new(),
        };
        let stop = AtomicBool::new(false);
        exec.execute_plan(&plan, &search_map(), &mut Vec::new(), &stop).await;
        // height 1920 → travel 640, half 320; center (540,960).
        assert_eq!(actuator.calls.lock().unwrap()[0], "swipe 540,1280->540,640");
    }

    #[tokio::test]
    async fn sub_origin_offsets_actuation_points() {
        let actuator = Arc::new(RecordingActuator::default());
        let exec = executor(actuator.clone()).with_sub_origin((0, 960));
        let stop = AtomicBool::new(false);
        exec.execute_plan(&click_plan("input_search"), &search_map(), &mut Vec::new(), &stop)
            .await;
        assert_eq!(actuator.calls.lock().unwrap()[0], "tap 300,1200");
    }

    #[tokio::test]
    async fn complete_classifies_declared_failure() {
        assert_eq!(
            classify_completion("Done: note saved"),
            Completion::Success("Done: note saved".into())
        );
        assert!(matches!(
            classify_completion("Unable to find the settings screen"),
            Completion::DeclaredFailure(_)
        ));
    }

    #[tokio::test]
    async fn extract_prefers_local_and_appends_synthetic_turn() {
        let actuator = Arc::new(RecordingActuator::default());
        let exec = executor(actuator);
        let mut step = PlanStep::bare(ActionKind::Extract);
        step.query = Some("list buttons".into());
        let mut map = search_map();
        map.regions[0].kind = RegionKind::Button;
        map.regions[0].text = "Save".into();
        let plan = Plan {
            steps: vec![step],
            reasoning: String::new(),
            confidence: crate::planner::plan::Confidence::Medium,
            progress: String::new(),
            relevant_apps: Vec::new(),
        };
        let mut turns = Vec::new();
        let stop = AtomicBool::new(false);
        // NoTransport would fail a fallback call; success proves the local path.
        let result = exec.execute_plan(&plan, &map, &mut turns, &stop).await;
        assert!(result.failure.is_none());
        assert_eq!(turns.len(), 1);
    }

    #[tokio::test]
    async fn extract_falls_back_to_planner_when_local_misses() {
        let actuator = Arc::new(RecordingActuator::default());
        let exec = StepExecutor::new(
            actuator,
            Arc::new(FixedTransport("42 items".into())),
            Arc::new(NullTelemetry),
        )
        .with_step_settle(Duration::from_millis(0));
        let mut step = PlanStep::bare(ActionKind::Extract);
        step.query = Some("zxqv".into());
        let plan = Plan {
            steps: vec![step],
            reasoning: String::new(),
            confidence: crate::planner::plan::Confidence::Medium,
            progress: String::new(),
            relevant_apps: Vec::new(),
        };
        let mut turns = Vec::new();
        let stop = AtomicBool::new(false);
        let result = exec.execute_plan(&plan, &search_map(), &mut turns, &stop).await;
        assert!(result.failure.is_none());
        assert!(matches!(
            &turns[0].content[0],
            crate::planner::types::TurnContent::Text { text } if text.contains("42 items")
        ));
    }

    #[tokio::test]
    async fn stop_flag_prevents_any_step() {
        let actuator = Arc::new(RecordingActuator::default());
        let exec = executor(actuator.clone());
        let stop = AtomicBool::new(true);
        let result = exec
            .execute_plan(&click_plan("input_search"), &search_map(), &mut Vec::new(), &stop)
            .await;
        assert!(result.stopped);
        assert_eq!(result.executed, 0);
        assert!(actuator.calls.lock().unwrap().is_empty());
    }
}
