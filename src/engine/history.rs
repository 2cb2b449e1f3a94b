use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::errors::UiPilotResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: i64,
    pub iteration: u32,
    pub kind: String,
    pub detail: Option<String>,
}

/// Append-only JSONL record of one task execution.
pub struct TaskHistory {
    pub task_id: String,
    entries: Vec<HistoryEntry>,
    file_path: std::path::PathBuf,
    enabled: bool,
}

impl TaskHistory {
    pub fn new(enabled: bool) -> Self {
        let task_id = uuid::Uuid::new_v4().to_string();
        let dir = data_dir_or_cwd();
        let file_path = dir.join(format!("task_{task_id}.jsonl"));
        Self {
            task_id,
            entries: Vec::new(),
            file_path,
            enabled,
        }
    }

    pub fn record(&mut self, iteration: u32, kind: &str, detail: Option<String>) {
        self.entries.push(HistoryEntry {
            ts: chrono::Utc::now().timestamp_millis(),
            iteration,
            kind: kind.to_string(),
            detail,
        });
        if self.enabled {
            if let Err(e) = self.flush() {
                tracing::warn!(error = %e, "history flush failed");
            }
        }
    }

    /// Append the latest entry to the JSONL file.
    fn flush(&self) -> UiPilotResult<()> {
        if let Some(last) = self.entries.last() {
            let line = serde_json::to_string(last)?;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.file_path)?;
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }
}

/// `%LOCALAPPDATA%\UiPilot\tasks` on Windows,
/// `~/.local/share/uipilot/tasks` on Linux/macOS,
/// falling back to the current working directory.
fn data_dir_or_cwd() -> std::path::PathBuf {
    #[cfg(target_os = "windows")]
    let base = std::env::var("LOCALAPPDATA").ok().map(std::path::PathBuf::from);

    #[cfg(not(target_os = "windows"))]
    let base = std::env::var("HOME")
        .ok()
        .map(|h| std::path::PathBuf::from(h).join(".local").join("share"));

    if let Some(data_dir) = base {
        let d = data_dir.join("uipilot").join("tasks");
        let _ = std::fs::create_dir_all(&d);
        return d;
    }
    std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."))
}
