use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn engine_log_path(state_root: &Path) -> PathBuf {
    state_root.join("logs/engine.log")
}

pub fn runtime_log_path(state_root: &Path) -> PathBuf {
    state_root.join("logs/runtime.log")
}

pub fn append_engine_log_line(state_root: &Path, line: &str) -> std::io::Result<()> {
    append_line(&engine_log_path(state_root), line)
}

pub fn append_runtime_log(state_root: &Path, level: &str, event: &str, message: &str) {
    let payload = serde_json::json!({
        "timestamp": now_secs(),
        "level": level,
        "event": event,
        "message": message,
    });

    let Ok(line) = serde_json::to_string(&payload) else {
        return;
    };
    let _ = append_line(&runtime_log_path(state_root), &line);
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

/// Decision log for the orchestration engine. Writes never fail the caller.
#[derive(Debug, Clone)]
pub struct EngineLog {
    state_root: PathBuf,
}

impl EngineLog {
    pub fn new(state_root: &Path) -> Self {
        Self {
            state_root: state_root.to_path_buf(),
        }
    }

    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    pub fn record(&self, now: i64, workflow_id: impl std::fmt::Display, fields: &str) {
        let line = format!("ts={now} workflow_id={workflow_id} {fields}");
        let _ = append_engine_log_line(&self.state_root, &line);
    }

    pub fn runtime(&self, level: &str, event: &str, message: &str) {
        append_runtime_log(&self.state_root, level, event, message);
    }
}
