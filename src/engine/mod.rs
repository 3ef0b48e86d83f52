use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod process;
pub mod stream_parse;

pub use process::ProcessEngine;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine binary missing: {binary}")]
    MissingBinary { binary: String },
    #[error("engine process failed with exit code {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },
    #[error("engine process timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("tool `{tool}` was denied")]
    ToolDenied { tool: String },
    #[error("engine failed: {reason}")]
    Failed { reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Terminal payload of one engine invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineResult {
    pub session_id: String,
    pub cost: f64,
    pub turns: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    #[serde(rename_all = "camelCase")]
    Init { session_id: String },
    Text { text: String },
    ToolStart { tool: String },
    ToolEnd,
    Result(EngineResult),
}

/// Blocking yes/no decision on a tool call the engine is about to make.
pub trait ToolApprover: Send + Sync {
    fn approve(&self, tool_name: &str, args: &Value) -> bool;
}

#[derive(Clone)]
pub struct EngineRequest {
    pub prompt: String,
    pub resume_session: Option<String>,
    pub workspace: PathBuf,
    pub model: String,
    pub max_turns: u32,
    pub approver: Option<Arc<dyn ToolApprover>>,
}

impl std::fmt::Debug for EngineRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRequest")
            .field("prompt", &self.prompt)
            .field("resume_session", &self.resume_session)
            .field("workspace", &self.workspace)
            .field("model", &self.model)
            .field("max_turns", &self.max_turns)
            .field("approver", &self.approver.is_some())
            .finish()
    }
}

/// Runs one agent turn, pushing events into `sink` as they happen.
pub trait AgentEngine: Send + Sync {
    fn run(
        &self,
        request: &EngineRequest,
        sink: &mut dyn FnMut(EngineEvent),
    ) -> Result<(), EngineError>;
}
