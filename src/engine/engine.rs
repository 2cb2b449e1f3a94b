//! The top-level bounded state machine: perceive, decide, plan, act, detect
//! non-progress, escalate — under a hard iteration ceiling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::LoopConfig;
use crate::engine::blackboard::Blackboard;
use crate::engine::history::TaskHistory;
use crate::engine::state::{FailureContext, FailureKind, LoopState};
use crate::engine::stuck::StuckDetector;
use crate::executor::actuator::Actuator;
use crate::executor::step::{Completion, StepExecutor};
use crate::perception::diff::diff_canonical;
use crate::perception::screenshot_policy::{
    richness_score, should_send_screenshot, RichnessSignals,
};
use crate::perception::snapshot::build_map;
use crate::perception::traits::{
    Capture, Overlay, StructuralPerception, TextRecognition, VisualPerception,
};
use crate::perception::types::EnvironmentMap;
use crate::planner::parser::parse_plan;
use crate::planner::plan::{ActionKind, Plan};
use crate::planner::prompt::{build_instructions, build_user_text, PromptContext};
use crate::planner::strategy::{StrategicPlan, StrategicPlanner};
use crate::planner::transport::PlannerTransport;
use crate::planner::types::ConversationTurn;
use crate::telemetry::{
    ResultObserver, TaskReport, TaskStatus, TelemetryEvent, TelemetrySink,
};

/// Injected capability objects, constructed once and handed to the loop.
/// No ambient lookup anywhere in the core.
pub struct LoopCapabilities {
    pub structural: Arc<dyn StructuralPerception>,
    pub visual: Arc<dyn VisualPerception>,
    pub recognition: Arc<dyn TextRecognition>,
    pub overlay: Arc<dyn Overlay>,
    pub actuator: Arc<dyn Actuator>,
    pub transport: Arc<dyn PlannerTransport>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub observer: Option<Arc<dyn ResultObserver>>,
}

pub struct ControlLoop {
    caps: LoopCapabilities,
    config: LoopConfig,
    stop: Arc<AtomicBool>,
    state: LoopState,
    blackboard: Option<Arc<Blackboard>>,
    sub_origin: (i32, i32),
    label: String,
}

impl ControlLoop {
    pub fn new(caps: LoopCapabilities, config: LoopConfig) -> Self {
        Self {
            caps,
            config,
            stop: Arc::new(AtomicBool::new(false)),
            state: LoopState::Idle,
            blackboard: None,
            sub_origin: (0, 0),
            label: "main".into(),
        }
    }

    pub fn with_blackboard(mut self, blackboard: Arc<Blackboard>) -> Self {
        self.blackboard = Some(blackboard);
        self
    }

    pub fn with_sub_region(mut self, label: impl Into<String>, origin: (i32, i32)) -> Self {
        self.label = label.into();
        self.sub_origin = origin;
        self
    }

    /// Cooperative stop handle: checked at every iteration boundary and
    /// before every step, never interrupting an in-flight actuator call.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// Execute one task to a terminal status. Exactly one terminal report is
    /// produced on every exit path.
    pub async fn run(&mut self, task: &str) -> TaskReport {
        let started = Instant::now();
        let mut history = TaskHistory::new(self.config.record_history);
        let task_id = history.task_id.clone();
        tracing::info!(loop_label = %self.label, task_id = %task_id, task, "task starting");

        // Preconditions: capabilities are present by construction; the
        // credential check is the transport's readiness.
        if !self.caps.transport.ready() {
            let report = self.finish(
                &mut history,
                task_id,
                task,
                TaskStatus::Error,
                0,
                started,
                "planner transport not configured (missing credential)".into(),
            );
            return report;
        }

        self.state = LoopState::Running { task: task.to_string() };
        history.record(0, "task_started", Some(task.to_string()));

        // Per-task state, cleared on every new task.
        let mut turns: Vec<ConversationTurn> = Vec::new();
        let mut failures = FailureContext::default();
        let mut stuck = StuckDetector::new(
            self.config.stagnation_threshold,
            self.config.failure_consult_threshold,
            self.config.consult_cooldown,
        );
        let mut prev_canonical = String::new();
        let mut prior_iteration_failed = false;
        let mut strategy: Option<StrategicPlan> = None;
        let strategist =
            StrategicPlanner::new(self.caps.transport.clone(), self.caps.telemetry.clone());

        if self.config.initial_strategy {
            match strategist.initial(task, "(not yet observed)").await {
                Ok(plan) => strategy = Some(plan),
                Err(e) => {
                    tracing::warn!(error = %e, "initial strategic consult failed, continuing without");
                }
            }
        }

        let executor = {
            let mut exec = StepExecutor::new(
                self.caps.actuator.clone(),
                self.caps.transport.clone(),
                self.caps.telemetry.clone(),
            )
            .with_sub_origin(self.sub_origin)
            .with_step_settle(Duration::from_millis(self.config.step_settle_ms));
            if let Some(board) = &self.blackboard {
                exec = exec.with_blackboard(board.clone());
            }
            exec
        };

        let mut iteration: u32 = 0;
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return self.finish(
                    &mut history,
                    task_id,
                    task,
                    TaskStatus::Stopped,
                    iteration,
                    started,
                    "stopped on request".into(),
                );
            }
            if iteration >= self.config.max_iterations {
                return self.finish(
                    &mut history,
                    task_id,
                    task,
                    TaskStatus::BudgetExhausted,
                    iteration,
                    started,
                    format!("iteration budget of {} exhausted", self.config.max_iterations),
                );
            }

            // Last-resort consult shortly before the ceiling, if failures are
            // still outstanding.
            if iteration + self.config.last_resort_margin == self.config.max_iterations
                && stuck.failures_outstanding()
            {
                match strategist
                    .recovery(task, &prev_canonical, &failures.descriptions())
                    .await
                {
                    Ok(plan) => {
                        stuck.note_consult();
                        strategy = Some(plan);
                    }
                    Err(e) => tracing::warn!(error = %e, "last-resort consult failed"),
                }
            }

            stuck.begin_iteration();
            iteration += 1;
            tracing::debug!(loop_label = %self.label, iteration, "iteration starting");

            // ── Perceive ──────────────────────────────────────────────────
            let capture = match self.capture_with_retry().await {
                Ok(capture) => capture,
                Err(e) => {
                    return self.finish(
                        &mut history,
                        task_id,
                        task,
                        TaskStatus::Error,
                        iteration,
                        started,
                        format!("perception failed twice ({e}); check capture permissions and surface availability"),
                    );
                }
            };
            let structural = match self.structural_with_retry() {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    return self.finish(
                        &mut history,
                        task_id,
                        task,
                        TaskStatus::Error,
                        iteration,
                        started,
                        format!("structural perception failed twice ({e})"),
                    );
                }
            };
            let recognized = match &capture {
                Some(c) => self
                    .caps
                    .recognition
                    .recognize(c)
                    .await
                    .unwrap_or_default(),
                None => Vec::new(),
            };
            let map = build_map(structural, recognized);
            let canonical = map.canonical_text();
            let diff = diff_canonical(&prev_canonical, &canonical);

            // ── Stagnation: automatic BACK, planner skipped this turn ─────
            if stuck.observe_map(&canonical) {
                tracing::warn!(
                    loop_label = %self.label,
                    threshold = self.config.stagnation_threshold,
                    "screen unchanged, issuing automatic back"
                );
                self.caps.telemetry.record(TelemetryEvent::StagnationRecovery {
                    identical_maps: self.config.stagnation_threshold,
                });
                let _ = self.caps.actuator.back().await;
                failures.record(
                    FailureKind::Stagnation,
                    "screen unchanged for several iterations; navigated back automatically",
                );
                history.record(iteration, "stagnation_back", None);
                prev_canonical = canonical;
                prior_iteration_failed = true;
                tokio::time::sleep(Duration::from_millis(self.config.iteration_settle_ms)).await;
                continue;
            }

            // ── Decide whether the planner needs pixels ───────────────────
            let signals =
                RichnessSignals::from_map(&map, prior_iteration_failed, stuck.identical_count());
            let richness = richness_score(&signals);
            let attach_screenshot =
                should_send_screenshot(richness, self.config.richness_threshold)
                    && capture.is_some();
            tracing::debug!(richness, attach_screenshot, "screenshot decision");

            // ── Acquire a plan ────────────────────────────────────────────
            let first_call = turns.is_empty();
            let strategy_note = strategy.as_ref().map(StrategicPlan::prompt_note);
            let blackboard_note = self.blackboard.as_ref().and_then(|b| b.prompt_note());
            let environment_note = format!(
                "surface {} at origin ({},{}), {}x{} px",
                self.label, self.sub_origin.0, self.sub_origin.1, map.width, map.height
            );
            let failure_notes = failures.descriptions();
            let user_text = build_user_text(&PromptContext {
                task,
                map_text: &canonical,
                diff: Some(&diff),
                environment_note: Some(environment_note.as_str()),
                recent_failures: &failure_notes,
                strategy_note: strategy_note.as_deref(),
                blackboard_note: blackboard_note.as_deref(),
                peer_completed: self
                    .blackboard
                    .as_ref()
                    .map(|b| b.any_complete())
                    .unwrap_or(false),
                first_call,
            });
            let turn = match (&capture, attach_screenshot) {
                (Some(c), true) => ConversationTurn::user_with_capture(user_text, c),
                _ => ConversationTurn::user(user_text),
            };
            turns.push(turn);

            let instructions = build_instructions(first_call);
            let raw = match self.caps.transport.complete(&turns, &instructions).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::error!(error = %e, "planner transport failed, aborting iteration");
                    history.record(iteration, "transport_failure", Some(e.to_string()));
                    // Withdraw the unanswered turn so the conversation stays
                    // an alternating user/assistant sequence.
                    turns.pop();
                    tokio::time::sleep(Duration::from_millis(self.config.iteration_settle_ms))
                        .await;
                    continue;
                }
            };
            turns.push(ConversationTurn::assistant(raw.clone()));

            let plan = parse_plan(&raw, &self.caps.telemetry);
            if first_call && !plan.relevant_apps.is_empty() {
                tracing::info!(apps = ?plan.relevant_apps, "planner suggested relevant targets");
                history.record(iteration, "relevant_apps", Some(plan.relevant_apps.join(",")));
            }

            // ── Verify risky steps against the fresh map ──────────────────
            if self.config.verify_risky_steps {
                if let Err((element, reason)) = verify_risky_steps(&plan, &map) {
                    tracing::warn!(element = %element, reason = %reason, "pre-execution verification failed");
                    self.caps.telemetry.record(TelemetryEvent::VerificationFailed {
                        element: element.clone(),
                        reason: reason.clone(),
                    });
                    failures.record(FailureKind::Verification, format!("{element}: {reason}"));
                    stuck.record_failure();
                    prev_canonical = canonical;
                    prior_iteration_failed = true;
                    history.record(iteration, "verification_failure", Some(element));
                    tokio::time::sleep(Duration::from_millis(self.config.iteration_settle_ms))
                        .await;
                    continue;
                }
            }

            // ── Execute ───────────────────────────────────────────────────
            let result = executor.execute_plan(&plan, &map, &mut turns, &self.stop).await;
            history.record(
                iteration,
                "steps_executed",
                Some(format!("{}/{}", result.executed, plan.steps.len())),
            );
            if result.stopped {
                return self.finish(
                    &mut history,
                    task_id,
                    task,
                    TaskStatus::Stopped,
                    iteration,
                    started,
                    "stopped on request".into(),
                );
            }
            if let Some(completion) = result.completion {
                if let Some(board) = &self.blackboard {
                    board.mark_complete();
                }
                let (status, message) = match completion {
                    Completion::Success(m) => (TaskStatus::Success, m),
                    Completion::DeclaredFailure(m) => (TaskStatus::DeclaredFailure, m),
                };
                return self.finish(&mut history, task_id, task, status, iteration, started, message);
            }
            if let Some(reason) = result.failure {
                failures.record(FailureKind::Execution, reason);
                stuck.record_failure();
                prior_iteration_failed = true;
            } else {
                prior_iteration_failed = false;
            }

            // ── Escalate on sustained failure ─────────────────────────────
            if stuck.should_consult() {
                match strategist
                    .recovery(task, &canonical, &failures.descriptions())
                    .await
                {
                    Ok(plan) => {
                        stuck.note_consult();
                        strategy = Some(plan);
                    }
                    Err(e) => tracing::warn!(error = %e, "recovery consult failed"),
                }
            }

            prev_canonical = canonical;
            self.caps
                .telemetry
                .record(TelemetryEvent::IterationCompleted { index: iteration });
            tokio::time::sleep(Duration::from_millis(self.config.iteration_settle_ms)).await;
        }
    }

    /// Capture with the presentation hidden; restore is ordered after the
    /// attempt, not timed. One retry, then the failure is fatal.
    async fn capture_with_retry(&self) -> Result<Option<Capture>, crate::errors::UiPilotError> {
        self.caps.overlay.hide().await;
        let mut attempt = self.caps.visual.capture().await;
        if attempt.is_err() {
            tracing::warn!("capture failed, retrying once");
            attempt = self.caps.visual.capture().await;
        }
        self.caps.overlay.restore().await;
        attempt
    }

    fn structural_with_retry(
        &self,
    ) -> Result<crate::perception::snapshot::StructuralSnapshot, crate::errors::UiPilotError> {
        self.caps
            .structural
            .snapshot()
            .or_else(|e| {
                tracing::warn!(error = %e, "structural snapshot failed, retrying once");
                self.caps.structural.snapshot()
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &mut self,
        history: &mut TaskHistory,
        task_id: String,
        task: &str,
        status: TaskStatus,
        iterations: u32,
        started: Instant,
        message: String,
    ) -> TaskReport {
        self.state = match status {
            TaskStatus::Success | TaskStatus::DeclaredFailure => {
                LoopState::Completed { message: message.clone() }
            }
            TaskStatus::BudgetExhausted => LoopState::BudgetExhausted,
            TaskStatus::Stopped => LoopState::Stopped,
            TaskStatus::Error => LoopState::Failed { message: message.clone() },
        };
        let report = TaskReport {
            task_id,
            task: task.to_string(),
            status,
            iterations,
            duration_ms: started.elapsed().as_millis() as u64,
            final_message: message,
        };
        history.record(iterations, "task_finished", Some(format!("{status:?}")));
        tracing::info!(
            loop_label = %self.label,
            status = ?report.status,
            iterations = report.iterations,
            duration_ms = report.duration_ms,
            "task finished"
        );
        if let Some(observer) = &self.caps.observer {
            observer.task_finished(&report);
        }
        report
    }
}

/// Click and type steps must name an element present on the fresh map.
/// Returns the offending element and reason on the first miss.
fn verify_risky_steps(plan: &Plan, map: &EnvironmentMap) -> Result<(), (String, String)> {
    for step in &plan.steps {
        let risky = matches!(
            step.action,
            ActionKind::Click | ActionKind::LongPress | ActionKind::Type
        );
        if !risky {
            continue;
        }
        let Some(element) = step.element.as_deref() else {
            // Type without an element targets the focused field; nothing to
            // verify. Click without an element fails in the executor.
            continue;
        };
        if map.region(element).is_none() {
            return Err((
                element.to_string(),
                "not present on the current screen".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::errors::{UiPilotError, UiPilotResult};
    use crate::perception::snapshot::StructuralSnapshot;
    use crate::perception::types::{Bounds, Provenance, Region, RegionKind};
    use crate::telemetry::NullTelemetry;

    // ── Mock capabilities ────────────────────────────────────────────────

    struct StaticStructural(Vec<Region>);

    impl StructuralPerception for StaticStructural {
        fn snapshot(&self) -> UiPilotResult<StructuralSnapshot> {
            Ok(StructuralSnapshot {
                regions: self.0.clone(),
                width: 1080,
                height: 1920,
                rich_content: false,
                input_method_visible: false,
            })
        }
    }

    struct NoCapture;

    #[async_trait]
    impl VisualPerception for NoCapture {
        async fn capture(&self) -> UiPilotResult<Option<Capture>> {
            Ok(None)
        }
    }

    struct FailingCapture;

    #[async_trait]
    impl VisualPerception for FailingCapture {
        async fn capture(&self) -> UiPilotResult<Option<Capture>> {
            Err(UiPilotError::Perception("no display".into()))
        }
    }

    struct NoRecognition;

    #[async_trait]
    impl TextRecognition for NoRecognition {
        async fn recognize(&self, _c: &Capture) -> UiPilotResult<Vec<Region>> {
            Ok(Vec::new())
        }
    }

    struct NoOverlay;

    #[async_trait]
    impl Overlay for NoOverlay {
        async fn hide(&self) {}
        async fn restore(&self) {}
    }

    #[derive(Default)]
    struct CountingActuator {
        taps: Mutex<u32>,
        backs: Mutex<u32>,
    }

    #[async_trait]
    impl Actuator for CountingActuator {
        async fn tap(&self, _x: i32, _y: i32) -> bool {
            *self.taps.lock().unwrap() += 1;
            true
        }
        async fn long_press(&self, _x: i32, _y: i32, _d: u64) -> bool {
            true
        }
        async fn type_text(&self, _t: &str) -> bool {
            true
        }
        async fn swipe(&self, _a: i32, _b: i32, _c: i32, _d: i32, _e: u64) -> bool {
            true
        }
        async fn back(&self) -> bool {
            *self.backs.lock().unwrap() += 1;
            true
        }
        async fn home(&self) -> bool {
            true
        }
        async fn open_target(&self, _id: &str) -> bool {
            true
        }
        async fn dismiss_input_method(&self) -> bool {
            true
        }
        async fn submit(&self) -> bool {
            true
        }
    }

    struct ScriptedTransport {
        responses: Mutex<VecDeque<String>>,
        calls: Mutex<u32>,
        fallback: String,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<&str>, fallback: &str) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
                calls: Mutex::new(0),
                fallback: fallback.to_string(),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl PlannerTransport for ScriptedTransport {
        async fn complete(
            &self,
            _turns: &[ConversationTurn],
            _instructions: &str,
        ) -> UiPilotResult<String> {
            *self.calls.lock().unwrap() += 1;
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone()))
        }
    }

    struct UnreadyTransport;

    #[async_trait]
    impl PlannerTransport for UnreadyTransport {
        async fn complete(
            &self,
            _turns: &[ConversationTurn],
            _instructions: &str,
        ) -> UiPilotResult<String> {
            unreachable!("must not be called when not ready")
        }
        fn ready(&self) -> bool {
            false
        }
    }

    const WAIT_PLAN: &str =
        r#"{"steps":[{"action":"wait","duration_ms":0,"description":"idle"}],"reasoning":"r"}"#;
    const COMPLETE_PLAN: &str =
        r#"{"steps":[{"action":"complete","description":"note saved"}],"reasoning":"r"}"#;
    const COMPLETE_FAILURE_PLAN: &str =
        r#"{"steps":[{"action":"complete","description":"unable to find the target"}],"reasoning":"r"}"#;

    fn save_button() -> Region {
        Region {
            id: String::new(),
            kind: RegionKind::Button,
            text: "Save".into(),
            bounds: Bounds::new(0, 0, 200, 80),
            clickable: true,
            provenance: Provenance::Structural,
        }
    }

    fn fast_config(max_iterations: u32) -> LoopConfig {
        LoopConfig {
            max_iterations,
            step_settle_ms: 0,
            iteration_settle_ms: 0,
            initial_strategy: false,
            record_history: false,
            ..Default::default()
        }
    }

    fn make_loop(transport: Arc<dyn PlannerTransport>, max_iterations: u32) -> ControlLoop {
        let caps = LoopCapabilities {
            structural: Arc::new(StaticStructural(vec![save_button()])),
            visual: Arc::new(NoCapture),
            recognition: Arc::new(NoRecognition),
            overlay: Arc::new(NoOverlay),
            actuator: Arc::new(CountingActuator::default()),
            transport,
            telemetry: Arc::new(NullTelemetry),
            observer: None,
        };
        ControlLoop::new(caps, fast_config(max_iterations))
    }

    #[tokio::test]
    async fn unready_transport_is_a_fatal_precondition() {
        let mut agent = make_loop(Arc::new(UnreadyTransport), 5);
        let report = agent.run("do nothing").await;
        assert_eq!(report.status, TaskStatus::Error);
        assert_eq!(report.iterations, 0);
        assert!(matches!(agent.state(), LoopState::Failed { .. }));
    }

    #[tokio::test]
    async fn ceiling_is_never_exceeded() {
        // Waiting forever: the loop must end at the configured ceiling. The
        // map never changes, so iterations alternate planner turns and
        // stagnation backs, but the ceiling binds regardless of plan content.
        let transport = Arc::new(ScriptedTransport::new(vec![], WAIT_PLAN));
        let mut agent = make_loop(transport.clone(), 6);
        let report = agent.run("loop forever").await;
        assert_eq!(report.status, TaskStatus::BudgetExhausted);
        assert_eq!(report.iterations, 6);
        assert!(transport.calls() <= 6);
    }

    #[tokio::test]
    async fn sole_complete_step_finishes_successfully() {
        let transport = Arc::new(ScriptedTransport::new(vec![COMPLETE_PLAN], WAIT_PLAN));
        let mut agent = make_loop(transport, 10);
        let report = agent.run("save the note").await;
        assert_eq!(report.status, TaskStatus::Success);
        assert_eq!(report.final_message, "note saved");
        assert_eq!(report.iterations, 1);
        assert!(matches!(agent.state(), LoopState::Completed { .. }));
    }

    #[tokio::test]
    async fn failure_phrased_complete_still_completes_as_declared_failure() {
        let transport = Arc::new(ScriptedTransport::new(vec![COMPLETE_FAILURE_PLAN], WAIT_PLAN));
        let mut agent = make_loop(transport, 10);
        let report = agent.run("find the target").await;
        assert_eq!(report.status, TaskStatus::DeclaredFailure);
        assert!(matches!(agent.state(), LoopState::Completed { .. }));
    }

    #[tokio::test]
    async fn three_identical_maps_issue_one_back_and_skip_the_planner() {
        let transport = Arc::new(ScriptedTransport::new(vec![], WAIT_PLAN));
        let actuator = Arc::new(CountingActuator::default());
        let caps = LoopCapabilities {
            structural: Arc::new(StaticStructural(vec![save_button()])),
            visual: Arc::new(NoCapture),
            recognition: Arc::new(NoRecognition),
            overlay: Arc::new(NoOverlay),
            actuator: actuator.clone(),
            transport: transport.clone(),
            telemetry: Arc::new(NullTelemetry),
            observer: None,
        };
        let mut agent = ControlLoop::new(caps, fast_config(3));
        let report = agent.run("wait around").await;
        assert_eq!(report.status, TaskStatus::BudgetExhausted);
        // Iterations 1 and 2 call the planner; iteration 3 sees the third
        // identical map and goes straight to the automatic back.
        assert_eq!(transport.calls(), 2);
        assert_eq!(*actuator.backs.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn preset_stop_flag_stops_before_any_work() {
        let transport = Arc::new(ScriptedTransport::new(vec![], WAIT_PLAN));
        let mut agent = make_loop(transport.clone(), 10);
        agent.stop_handle().store(true, Ordering::Relaxed);
        let report = agent.run("anything").await;
        assert_eq!(report.status, TaskStatus::Stopped);
        assert_eq!(transport.calls(), 0);
        assert!(matches!(agent.state(), LoopState::Stopped));
    }

    #[tokio::test]
    async fn capture_failure_is_retried_then_fatal() {
        let transport = Arc::new(ScriptedTransport::new(vec![], WAIT_PLAN));
        let caps = LoopCapabilities {
            structural: Arc::new(StaticStructural(vec![save_button()])),
            visual: Arc::new(FailingCapture),
            recognition: Arc::new(NoRecognition),
            overlay: Arc::new(NoOverlay),
            actuator: Arc::new(CountingActuator::default()),
            transport,
            telemetry: Arc::new(NullTelemetry),
            observer: None,
        };
        let mut agent = ControlLoop::new(caps, fast_config(10));
        let report = agent.run("anything").await;
        assert_eq!(report.status, TaskStatus::Error);
        assert!(report.final_message.contains("perception failed twice"));
    }

    #[tokio::test]
    async fn verification_failure_aborts_the_plan_without_tapping() {
        let ghost_click =
            r#"{"steps":[{"action":"click","element":"button_ghost","description":"tap"}],"reasoning":"r"}"#;
        let transport = Arc::new(ScriptedTransport::new(vec![ghost_click, COMPLETE_PLAN], WAIT_PLAN));
        let actuator = Arc::new(CountingActuator::default());
        let caps = LoopCapabilities {
            structural: Arc::new(StaticStructural(vec![save_button()])),
            visual: Arc::new(NoCapture),
            recognition: Arc::new(NoRecognition),
            overlay: Arc::new(NoOverlay),
            actuator: actuator.clone(),
            transport,
            telemetry: Arc::new(NullTelemetry),
            observer: None,
        };
        let mut agent = ControlLoop::new(caps, fast_config(10));
        let report = agent.run("tap the ghost").await;
        assert_eq!(report.status, TaskStatus::Success);
        assert_eq!(*actuator.taps.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn observer_receives_exactly_one_terminal_report() {
        struct Collector(Mutex<Vec<TaskReport>>);
        impl ResultObserver for Collector {
            fn task_finished(&self, report: &TaskReport) {
                self.0.lock().unwrap().push(report.clone());
            }
        }

        let collector = Arc::new(Collector(Mutex::new(Vec::new())));
        let transport = Arc::new(ScriptedTransport::new(vec![COMPLETE_PLAN], WAIT_PLAN));
        let caps = LoopCapabilities {
            structural: Arc::new(StaticStructural(vec![save_button()])),
            visual: Arc::new(NoCapture),
            recognition: Arc::new(NoRecognition),
            overlay: Arc::new(NoOverlay),
            actuator: Arc::new(CountingActuator::default()),
            transport,
            telemetry: Arc::new(NullTelemetry),
            observer: Some(collector.clone()),
        };
        let mut agent = ControlLoop::new(caps, fast_config(10));
        agent.run("save").await;
        let reports = collector.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, TaskStatus::Success);
    }
}
