use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{UiPilotError, UiPilotResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: LoopConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
}

/// Knobs for one control loop. Defaults match the reference deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Hard iteration ceiling, enforced independent of everything else.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Identical canonical maps before the automatic BACK fires.
    #[serde(default = "default_stagnation_threshold")]
    pub stagnation_threshold: u32,
    /// Failures since the last strategic consult required to trigger a new one.
    #[serde(default = "default_failure_consult_threshold")]
    pub failure_consult_threshold: u32,
    /// Minimum iterations between strategic consults.
    #[serde(default = "default_consult_cooldown")]
    pub consult_cooldown: u32,
    /// Iterations before the ceiling at which the last-resort consult fires.
    #[serde(default = "default_last_resort_margin")]
    pub last_resort_margin: u32,
    /// Richness below this attaches a screenshot to the planner request.
    #[serde(default = "default_richness_threshold")]
    pub richness_threshold: f64,
    /// Settle delay between executed steps.
    #[serde(default = "default_step_settle_ms")]
    pub step_settle_ms: u64,
    /// Settle delay between iterations, and after a transport failure.
    #[serde(default = "default_iteration_settle_ms")]
    pub iteration_settle_ms: u64,
    /// Run the strategist at task start.
    #[serde(default = "default_true")]
    pub initial_strategy: bool,
    /// Verify click/type targets against the fresh map before executing.
    #[serde(default = "default_true")]
    pub verify_risky_steps: bool,
    /// Write a JSONL history file per task.
    #[serde(default = "default_true")]
    pub record_history: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            stagnation_threshold: default_stagnation_threshold(),
            failure_consult_threshold: default_failure_consult_threshold(),
            consult_cooldown: default_consult_cooldown(),
            last_resort_margin: default_last_resort_margin(),
            richness_threshold: default_richness_threshold(),
            step_settle_ms: default_step_settle_ms(),
            iteration_settle_ms: default_iteration_settle_ms(),
            initial_strategy: default_true(),
            verify_risky_steps: default_true(),
            record_history: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Optional API key stored in config.toml (falls back to env var UIPILOT_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            api_key: None,
        }
    }
}

fn default_max_iterations() -> u32 {
    50
}
fn default_stagnation_threshold() -> u32 {
    3
}
fn default_failure_consult_threshold() -> u32 {
    3
}
fn default_consult_cooldown() -> u32 {
    3
}
fn default_last_resort_margin() -> u32 {
    5
}
fn default_richness_threshold() -> f64 {
    0.62
}
fn default_step_settle_ms() -> u64 {
    800
}
fn default_iteration_settle_ms() -> u64 {
    1500
}
fn default_api_base() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_true() -> bool {
    true
}

impl PlannerConfig {
    /// Resolve the API key: config.toml first, then the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("UIPILOT_API_KEY").ok().filter(|k| !k.is_empty()))
    }
}

fn resolve_config_path() -> UiPilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(UiPilotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> UiPilotResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &std::path::Path) -> UiPilotResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), model = %config.planner.model, "config loaded");
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &std::path::Path) -> UiPilotResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_reference_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.agent.max_iterations, 50);
        assert_eq!(cfg.agent.stagnation_threshold, 3);
        assert_eq!(cfg.agent.last_resort_margin, 5);
        assert!((cfg.agent.richness_threshold - 0.62).abs() < 1e-9);
        assert!(cfg.agent.initial_strategy);
    }

    #[test]
    fn partial_toml_overrides_only_named_keys() {
        let cfg: AppConfig = toml::from_str(
            "[agent]\nmax_iterations = 10\n\n[planner]\nmodel = \"test-model\"\n",
        )
        .unwrap();
        assert_eq!(cfg.agent.max_iterations, 10);
        assert_eq!(cfg.agent.failure_consult_threshold, 3);
        assert_eq!(cfg.planner.model, "test-model");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.agent.max_iterations = 7;
        save_config(&cfg, &path).unwrap();
        let back = load_config_from(&path).unwrap();
        assert_eq!(back.agent.max_iterations, 7);
    }
}
