use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{ "type": "approval:request", id, toolName, args, timeout }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "approval:request", rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: String,
    pub tool_name: String,
    pub args: Value,
    /// Milliseconds before the request resolves as denied.
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub id: String,
    pub approved: bool,
}

impl ApprovalResponse {
    pub fn approve(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            approved: true,
        }
    }

    pub fn deny(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            approved: false,
        }
    }
}
