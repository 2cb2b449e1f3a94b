//! Tolerant decoding of planner output into a typed [`Plan`].
//!
//! The planner is adversarially unreliable: fenced markdown, leading prose,
//! truncated JSON, invented action names. All of that handling lives here —
//! the loop always receives a plan, never a parse error.

use std::sync::Arc;

use serde_json::Value;

use crate::planner::plan::{ActionKind, Confidence, Plan, PlanStep, SwipeDirection};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

/// Parse raw planner text into a plan. Total failure degrades to a synthetic
/// one-step WAIT plan carrying the error as reasoning.
pub fn parse_plan(raw: &str, telemetry: &Arc<dyn TelemetrySink>) -> Plan {
    let Some(json) = extract_json_object(raw) else {
        let detail = format!("no JSON object in planner output ({} chars)", raw.len());
        tracing::warn!(detail = %detail, "plan parse failed");
        telemetry.record(TelemetryEvent::ParseAnomaly { detail: detail.clone() });
        return Plan::wait_fallback(detail);
    };

    let value: Value = match serde_json::from_str(&json) {
        Ok(v) => v,
        Err(e) => {
            let detail = format!("malformed plan JSON: {e}");
            tracing::warn!(detail = %detail, "plan parse failed");
            telemetry.record(TelemetryEvent::ParseAnomaly { detail: detail.clone() });
            return Plan::wait_fallback(detail);
        }
    };

    let mut steps = Vec::new();
    if let Some(raw_steps) = value["steps"].as_array() {
        for raw_step in raw_steps {
            steps.push(decode_step(raw_step, telemetry));
        }
    }
    if steps.is_empty() {
        telemetry.record(TelemetryEvent::ParseAnomaly {
            detail: "plan had no steps".into(),
        });
        return Plan::wait_fallback("planner returned an empty step list");
    }

    // COMPLETE must be the plan's only step; truncate defensively when the
    // planner combines it with others.
    if let Some(pos) = steps.iter().position(|s| s.action == ActionKind::Complete) {
        if steps.len() > 1 {
            telemetry.record(TelemetryEvent::ParseAnomaly {
                detail: format!("complete combined with {} other steps", steps.len() - 1),
            });
            steps = vec![steps.swap_remove(pos)];
        }
    }

    Plan {
        steps,
        reasoning: str_field(&value, &["reasoning", "rationale"]).unwrap_or_default(),
        confidence: Confidence::parse(
            &str_field(&value, &["confidence"]).unwrap_or_default(),
        ),
        progress: str_field(&value, &["progress"]).unwrap_or_default(),
        relevant_apps: value["relevant_apps"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn decode_step(raw: &Value, telemetry: &Arc<dyn TelemetrySink>) -> PlanStep {
    let action_raw = raw["action"].as_str().unwrap_or("");
    let action = match ActionKind::parse(action_raw) {
        Some(a) => a,
        None => {
            telemetry.record(TelemetryEvent::ParseAnomaly {
                detail: format!("unknown action keyword {action_raw:?}, coerced to wait"),
            });
            ActionKind::Wait
        }
    };

    let mut step = PlanStep::bare(action);
    step.element = str_field(raw, &["element", "element_id", "target"]);
    step.text = str_field(raw, &["text"]);
    step.direction = str_field(raw, &["direction"]).and_then(|d| SwipeDirection::parse(&d));
    step.duration_ms = raw["duration_ms"]
        .as_u64()
        .or_else(|| raw["duration"].as_u64());
    step.app = str_field(raw, &["app", "app_id", "package"]);
    step.query = str_field(raw, &["query"]);
    step.key = str_field(raw, &["key"]);
    step.value = str_field(raw, &["value"]);
    step.description = str_field(raw, &["description"]).unwrap_or_default();
    step
}

fn str_field(value: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| value[n].as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Best-effort extraction of the first top-level JSON object from text that
/// may wrap it in markdown fences or prose. Brace-balanced, string-aware.
pub(crate) fn extract_json_object(raw: &str) -> Option<String> {
    let text = strip_fences(raw);
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        // Drop the info string ("json") and the closing fence if present.
        let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
        return body.rsplit_once("```").map(|(b, _)| b).unwrap_or(body);
    }
    trimmed
}
