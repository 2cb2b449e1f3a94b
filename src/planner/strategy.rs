//! Strategic planner: ranked alternative approaches at task start and after
//! sustained failure, with a diagnosis class steering recovery away from
//! blind retry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{UiPilotError, UiPilotResult};
use crate::planner::parser::extract_json_object;
use crate::planner::plan::Confidence;
use crate::planner::transport::PlannerTransport;
use crate::planner::types::ConversationTurn;
use crate::telemetry::{TelemetryEvent, TelemetrySink};

const STRATEGIST_INSTRUCTIONS: &str = "\
You are the strategist of an on-device UI automation agent. Given a task \
(and possibly a record of failed attempts), reply with ONLY a JSON object:

{\"approaches\": [{\"name\": \"...\", \"description\": \"...\", \
\"steps_summary\": \"...\", \"confidence\": \"high|medium|low\"}], \
\"recommended\": 0, \"diagnosis\": \"wrong_target|obstruction|off_screen|\
wrong_screen|needs_different_gesture\"}

Offer 2-3 genuinely different approaches. `diagnosis` is required when \
failures are listed and must name the most likely cause; omit it otherwise.";

/// Failure tail entries forwarded to a recovery consult.
const RECOVERY_FAILURE_TAIL: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approach {
    pub name: String,
    pub description: String,
    pub steps_summary: String,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureDiagnosis {
    WrongTarget,
    Obstruction,
    OffScreen,
    WrongScreen,
    NeedsDifferentGesture,
}

impl FailureDiagnosis {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "wrong_target" => Some(Self::WrongTarget),
            "obstruction" => Some(Self::Obstruction),
            "off_screen" | "offscreen" => Some(Self::OffScreen),
            "wrong_screen" => Some(Self::WrongScreen),
            "needs_different_gesture" => Some(Self::NeedsDifferentGesture),
            _ => None,
        }
    }
}

/// Recommendation to split the task across two coordinated loops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelDecomposition {
    pub primary_target: String,
    pub secondary_target: String,
    pub primary_task: String,
    pub secondary_task: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategicPlan {
    pub approaches: Vec<Approach>,
    pub recommended: usize,
    pub diagnosis: Option<FailureDiagnosis>,
    pub decomposition: Option<ParallelDecomposition>,
}

impl StrategicPlan {
    pub fn recommended_approach(&self) -> Option<&Approach> {
        self.approaches.get(self.recommended)
    }

    /// One-line summary folded into the next planner prompt.
    pub fn prompt_note(&self) -> String {
        let mut note = match self.recommended_approach() {
            Some(a) => format!("{}: {} ({})", a.name, a.description, a.steps_summary),
            None => "no viable approach returned".into(),
        };
        if let Some(d) = self.diagnosis {
            note.push_str(&format!(" [diagnosis: {d:?}]"));
        }
        note
    }
}

/// Detects task phrasings that decompose into two independent sub-tasks.
/// Pure; no planner call.
pub fn detect_decomposition(task: &str) -> Option<ParallelDecomposition> {
    let lower = task.to_ascii_lowercase();

    // Lookup-then-act: "find/look up X in A, then ... in B"
    let lookup = regex::Regex::new(
        r"(?:find|look up|check|get)\s+(.+?)\s+in\s+([\w .]+?)\s*(?:,|;)?\s*then\s+(.+?)\s+in\s+([\w .]+)$",
    )
    .ok()?;
    if let Some(c) = lookup.captures(&lower) {
        return Some(ParallelDecomposition {
            primary_target: c[2].trim().to_string(),
            secondary_target: c[4].trim().to_string(),
            primary_task: format!("find {} in {}", c[1].trim(), c[2].trim()),
            secondary_task: format!("{} in {}", c[3].trim(), c[4].trim()),
        });
    }

    // Multi-source comparison: "compare X between/in A and B"
    let compare = regex::Regex::new(
        r"compare\s+(.+?)\s+(?:between|in|across|on)\s+([\w .]+?)\s+and\s+([\w .]+)$",
    )
    .ok()?;
    if let Some(c) = compare.captures(&lower) {
        return Some(ParallelDecomposition {
            primary_target: c[2].trim().to_string(),
            secondary_target: c[3].trim().to_string(),
            primary_task: format!("find {} in {}", c[1].trim(), c[2].trim()),
            secondary_task: format!("find {} in {}", c[1].trim(), c[3].trim()),
        });
    }

    // Cross-app coordination: "copy/move/send X from A to B"
    let cross = regex::Regex::new(
        r"(?:copy|move|send|transfer)\s+(.+?)\s+from\s+([\w .]+?)\s+to\s+([\w .]+)$",
    )
    .ok()?;
    if let Some(c) = cross.captures(&lower) {
        return Some(ParallelDecomposition {
            primary_target: c[2].trim().to_string(),
            secondary_target: c[3].trim().to_string(),
            primary_task: format!("retrieve {} from {}", c[1].trim(), c[2].trim()),
            secondary_task: format!("deliver {} to {}", c[1].trim(), c[3].trim()),
        });
    }

    None
}

pub struct StrategicPlanner {
    transport: Arc<dyn PlannerTransport>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl StrategicPlanner {
    pub fn new(transport: Arc<dyn PlannerTransport>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self { transport, telemetry }
    }

    /// Initial consult at task start.
    pub async fn initial(&self, task: &str, map_text: &str) -> UiPilotResult<StrategicPlan> {
        let prompt = format!("## Task\n{task}\n\n## Current screen\n{map_text}");
        let mut plan = self.consult(&prompt, "initial").await?;
        plan.decomposition = detect_decomposition(task);
        Ok(plan)
    }

    /// Recovery consult after sustained failure. The failure tail is bounded;
    /// the returned plan should carry a diagnosis.
    pub async fn recovery(
        &self,
        task: &str,
        map_text: &str,
        failures: &[String],
    ) -> UiPilotResult<StrategicPlan> {
        let tail: Vec<&str> = failures
            .iter()
            .rev()
            .take(RECOVERY_FAILURE_TAIL)
            .rev()
            .map(String::as_str)
            .collect();
        let prompt = format!(
            "## Task\n{task}\n\n## Failed attempts\n{}\n\n## Current screen\n{map_text}",
            tail.iter().map(|f| format!("- {f}\n")).collect::<String>(),
        );
        let plan = self.consult(&prompt, "recovery").await?;
        if plan.diagnosis.is_none() {
            tracing::warn!("recovery consult returned no diagnosis");
        }
        Ok(plan)
    }

    async fn consult(&self, prompt: &str, reason: &str) -> UiPilotResult<StrategicPlan> {
        let turns = vec![ConversationTurn::user(prompt)];
        let raw = self
            .transport
            .complete(&turns, STRATEGIST_INSTRUCTIONS)
            .await?;
        let plan = parse_strategic_plan(&raw)?;
        self.telemetry.record(TelemetryEvent::StrategicConsult {
            reason: reason.to_string(),
            approaches: plan.approaches.len(),
        });
        tracing::info!(
            reason,
            approaches = plan.approaches.len(),
            recommended = plan.recommended,
            diagnosis = ?plan.diagnosis,
            "strategic plan acquired"
        );
        Ok(plan)
    }
}

/// Tolerant decode of strategist output. Unlike plan parsing this may fail:
/// the caller treats a failed consult as a skipped consult, not a WAIT.
pub fn parse_strategic_plan(raw: &str) -> UiPilotResult<StrategicPlan> {
    let json = extract_json_object(raw)
        .ok_or_else(|| UiPilotError::Planner("no JSON object in strategist output".into()))?;
    let value: Value = serde_json::from_str(&json)
        .map_err(|e| UiPilotError::Planner(format!("malformed strategist JSON: {e}")))?;

    let approaches: Vec<Approach> = value["approaches"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|a| Approach {
                    name: a["name"].as_str().unwrap_or("unnamed").to_string(),
                    description: a["description"].as_str().unwrap_or_default().to_string(),
                    steps_summary: a["steps_summary"]
                        .as_str()
                        .or_else(|| a["steps"].as_str())
                        .unwrap_or_default()
                        .to_string(),
                    confidence: Confidence::parse(a["confidence"].as_str().unwrap_or_default()),
                })
                .collect()
        })
        .unwrap_or_default();

    if approaches.is_empty() {
        return Err(UiPilotError::Planner("strategist returned no approaches".into()));
    }

    let recommended = value["recommended"]
        .as_u64()
        .map(|i| i as usize)
        .filter(|i| *i < approaches.len())
        .unwrap_or(0);
    let diagnosis = value["diagnosis"].as_str().and_then(FailureDiagnosis::parse);

    Ok(StrategicPlan {
        approaches,
        recommended,
        diagnosis,
        decomposition: None,
    })
}
