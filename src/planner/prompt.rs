//! Assembles planner requests: a fixed instruction template plus one user
//! turn per iteration carrying the canonical map, the bounded diff, the
//! environment context, and the (possibly failure-annotated) task.

use crate::perception::diff::MapDiff;

pub const PLANNER_INSTRUCTIONS: &str = "\
You are the planner of an on-device UI automation agent. Each turn you \
receive the current screen as a list of regions (and sometimes a screenshot) \
and must reply with ONLY a JSON object:

{\"steps\": [{\"action\": \"...\", \"element\": \"...\", \"text\": \"...\", \
\"direction\": \"...\", \"duration_ms\": 0, \"app\": \"...\", \"query\": \"...\", \
\"key\": \"...\", \"value\": \"...\", \"description\": \"...\"}], \
\"reasoning\": \"...\", \"confidence\": \"high|medium|low\", \"progress\": \"...\"}

Actions: click, long_press, type, swipe, back, home, wait, complete, \
open_target, dismiss_input_method, submit, extract, share_finding.
Rules:
- Use region ids from the map as `element`; never invent ids.
- Plan at most 3 steps per turn; the screen changes under you.
- `complete` must be the only step of its plan, with a description stating \
what was achieved, or why the task is impossible.
- Prefer `extract` with a `query` when the task asks for information rather \
than interaction.
- `share_finding` stores a `key`/`value` fact for a peer agent.";

/// Extra instruction appended to the first request of a task only.
pub const FIRST_CALL_ADDENDUM: &str = "\
Additionally include \"relevant_apps\": a ranked list of app identifiers \
likely needed for this task.";

/// Everything the prompt builder folds into one user turn.
#[derive(Debug, Default)]
pub struct PromptContext<'a> {
    pub task: &'a str,
    pub map_text: &'a str,
    pub diff: Option<&'a MapDiff>,
    pub environment_note: Option<&'a str>,
    pub recent_failures: &'a [String],
    pub strategy_note: Option<&'a str>,
    pub blackboard_note: Option<&'a str>,
    pub peer_completed: bool,
    pub first_call: bool,
}

pub fn build_instructions(first_call: bool) -> String {
    if first_call {
        format!("{PLANNER_INSTRUCTIONS}\n{FIRST_CALL_ADDENDUM}")
    } else {
        PLANNER_INSTRUCTIONS.to_string()
    }
}

/// Render the user turn text for one iteration.
pub fn build_user_text(ctx: &PromptContext<'_>) -> String {
    let mut out = String::new();

    out.push_str("## Current screen\n");
    out.push_str(ctx.map_text);

    if let Some(rendered) = ctx.diff.and_then(MapDiff::render) {
        out.push_str("\n## Changes since last screen\n");
        out.push_str(&rendered);
    }

    if let Some(note) = ctx.environment_note {
        out.push_str("\n## Environment\n");
        out.push_str(note);
        out.push('\n');
    }

    if let Some(note) = ctx.blackboard_note {
        out.push_str("\n## Shared findings\n");
        out.push_str(note);
        out.push('\n');
    }
    if ctx.peer_completed {
        out.push_str("\nThe peer agent has declared its sub-task complete.\n");
    }

    if let Some(strategy) = ctx.strategy_note {
        out.push_str("\n## Strategy\n");
        out.push_str(strategy);
        out.push('\n');
    }

    out.push_str("\n## Task\n");
    out.push_str(ctx.task);
    out.push('\n');
    if !ctx.recent_failures.is_empty() {
        out.push_str("\nRecent attempts failed; do not repeat them blindly:\n");
        for f in ctx.recent_failures {
            out.push_str(&format!("- {f}\n"));
        }
    }

    if ctx.first_call {
        out.push_str("\nThis is the first look at the task. Include `relevant_apps`.\n");
    }

    out
}
