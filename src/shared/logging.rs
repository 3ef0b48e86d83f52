use serde_json::json;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Best-effort JSON-lines sink. A disabled log drops every record; write
/// failures are swallowed so logging never fails the caller.
#[derive(Debug, Clone, Default)]
pub struct RuntimeLog {
    path: Option<PathBuf>,
}

impl RuntimeLog {
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self, event: &str, message: &str) {
        self.record("info", event, message);
    }

    pub fn warn(&self, event: &str, message: &str) {
        self.record("warn", event, message);
    }

    pub fn error(&self, event: &str, message: &str) {
        self.record("error", event, message);
    }

    pub fn record(&self, level: &str, event: &str, message: &str) {
        let Some(path) = self.path.as_ref() else {
            return;
        };
        let payload = json!({
            "timestamp": super::time::now_secs(),
            "level": level,
            "event": event,
            "message": message,
        });
        let Ok(line) = serde_json::to_string(&payload) else {
            return;
        };
        if let Some(parent) = path.parent() {
            if fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) else {
            return;
        };
        let _ = writeln!(file, "{line}");
    }
}
