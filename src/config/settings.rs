use super::ConfigError;
use crate::approval::DEFAULT_APPROVAL_TIMEOUT;
use crate::shared::ids::validate_identifier_value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_HEARTBEAT_PROMPT: &str =
    "Check for anything that needs attention. Reply HEARTBEAT_OK if nothing does.";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub workspace: PathBuf,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelConfig>,
    #[serde(default)]
    pub outbound: OutboundSettings,
    #[serde(default)]
    pub approvals: ApprovalSettings,
    #[serde(default)]
    pub monitoring: Monitoring,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    #[serde(default = "default_engine_binary")]
    pub binary: String,
    #[serde(default = "default_engine_model")]
    pub model: String,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_engine_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            binary: default_engine_binary(),
            model: default_engine_model(),
            max_turns: default_max_turns(),
            timeout_seconds: default_engine_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DispatchSettings {
    #[serde(default)]
    pub max_pending: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChannelConfig {
    pub enabled: bool,
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
    #[serde(default)]
    pub allowlist: Vec<String>,
}

impl ChannelConfig {
    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// An empty allow-list admits every sender.
    pub fn permits(&self, sender_id: &str) -> bool {
        self.allowlist.is_empty() || self.allowlist.iter().any(|entry| entry == sender_id)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutboundSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_replay_interval_seconds")]
    pub replay_interval_seconds: u64,
}

impl Default for OutboundSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            replay_interval_seconds: default_replay_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApprovalSettings {
    #[serde(default = "default_approval_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub gated_tools: Vec<String>,
    #[serde(default)]
    pub notify_channel: Option<String>,
    #[serde(default)]
    pub notify_target: Option<String>,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_approval_timeout_ms(),
            gated_tools: Vec::new(),
            notify_channel: None,
            notify_target: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Monitoring {
    #[serde(default)]
    pub heartbeat_interval: Option<u64>,
    #[serde(default = "default_heartbeat_prompt")]
    pub heartbeat_prompt: String,
    #[serde(default)]
    pub heartbeat_channel: Option<String>,
    #[serde(default)]
    pub heartbeat_target: Option<String>,
}

impl Default for Monitoring {
    fn default() -> Self {
        Self {
            heartbeat_interval: None,
            heartbeat_prompt: default_heartbeat_prompt(),
            heartbeat_channel: None,
            heartbeat_target: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_engine_binary() -> String {
    "claude".to_string()
}

fn default_engine_model() -> String {
    "sonnet".to_string()
}

fn default_max_turns() -> u32 {
    25
}

fn default_engine_timeout_seconds() -> u64 {
    900
}

fn default_max_attempts() -> u32 {
    5
}

fn default_replay_interval_seconds() -> u64 {
    30
}

fn default_approval_timeout_ms() -> u64 {
    DEFAULT_APPROVAL_TIMEOUT.as_millis() as u64
}

fn default_heartbeat_prompt() -> String {
    DEFAULT_HEARTBEAT_PROMPT.to_string()
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.workspace.is_absolute() {
            return Err(ConfigError::Settings(
                "`workspace` must be an absolute path".to_string(),
            ));
        }

        if self.engine.binary.trim().is_empty() {
            return Err(ConfigError::Settings(
                "engine.binary must be non-empty".to_string(),
            ));
        }
        if self.engine.max_turns == 0 {
            return Err(ConfigError::Settings(
                "engine.max_turns must be > 0".to_string(),
            ));
        }
        if self.engine.timeout_seconds == 0 {
            return Err(ConfigError::Settings(
                "engine.timeout_seconds must be > 0".to_string(),
            ));
        }
        if self.dispatch.max_pending == Some(0) {
            return Err(ConfigError::Settings(
                "dispatch.max_pending must be > 0 when set".to_string(),
            ));
        }

        for (channel_id, config) in &self.channels {
            validate_identifier_value("channel id", channel_id).map_err(ConfigError::Settings)?;
            if config.allowlist.iter().any(|entry| entry.trim().is_empty()) {
                return Err(ConfigError::Settings(format!(
                    "channels.{channel_id}.allowlist entries must be non-empty"
                )));
            }
        }

        if self.outbound.max_attempts == 0 {
            return Err(ConfigError::Settings(
                "outbound.max_attempts must be > 0".to_string(),
            ));
        }
        if self.outbound.replay_interval_seconds == 0 {
            return Err(ConfigError::Settings(
                "outbound.replay_interval_seconds must be > 0".to_string(),
            ));
        }

        if self.approvals.timeout_ms == 0 {
            return Err(ConfigError::Settings(
                "approvals.timeout_ms must be > 0".to_string(),
            ));
        }
        self.validate_route(
            "approvals.notify_channel",
            self.approvals.notify_channel.as_deref(),
            "approvals.notify_target",
            self.approvals.notify_target.as_deref(),
        )?;
        self.validate_route(
            "monitoring.heartbeat_channel",
            self.monitoring.heartbeat_channel.as_deref(),
            "monitoring.heartbeat_target",
            self.monitoring.heartbeat_target.as_deref(),
        )?;

        Ok(())
    }

    fn validate_route(
        &self,
        channel_key: &str,
        channel: Option<&str>,
        target_key: &str,
        target: Option<&str>,
    ) -> Result<(), ConfigError> {
        match (channel, target) {
            (None, None) => Ok(()),
            (Some(_), None) => Err(ConfigError::Settings(format!(
                "`{target_key}` is required when `{channel_key}` is set"
            ))),
            (None, Some(_)) => Err(ConfigError::Settings(format!(
                "`{channel_key}` is required when `{target_key}` is set"
            ))),
            (Some(channel), Some(target)) => {
                if target.trim().is_empty() {
                    return Err(ConfigError::Settings(format!(
                        "`{target_key}` must be non-empty"
                    )));
                }
                if !self.channels.contains_key(channel) {
                    return Err(ConfigError::Settings(format!(
                        "`{channel_key}` references unknown channel `{channel}`"
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn approval_route(&self) -> Option<(String, String)> {
        Some((
            self.approvals.notify_channel.clone()?,
            self.approvals.notify_target.clone()?,
        ))
    }

    pub fn heartbeat_route(&self) -> Option<(String, String)> {
        Some((
            self.monitoring.heartbeat_channel.clone()?,
            self.monitoring.heartbeat_target.clone()?,
        ))
    }
}
