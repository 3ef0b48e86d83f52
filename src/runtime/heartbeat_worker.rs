use super::gateway::Gateway;
use crate::config::Settings;
use crate::dispatch::DispatchContext;
use std::time::Duration;

pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";
pub const HEARTBEAT_CHANNEL: &str = "heartbeat";

pub fn configured_heartbeat_interval(settings: &Settings) -> Option<Duration> {
    let seconds = settings.monitoring.heartbeat_interval.unwrap_or(0);
    if seconds == 0 {
        None
    } else {
        Some(Duration::from_secs(seconds))
    }
}

/// Asks the agent for a check-in. Returns the reply that was forwarded, if
/// any; `HEARTBEAT_OK` and empty replies stay silent.
pub fn tick_heartbeat(gateway: &Gateway, settings: &Settings) -> Result<Option<String>, String> {
    let handle = gateway.dispatcher().dispatch(
        settings.monitoring.heartbeat_prompt.clone(),
        None,
        |_| {},
        Some(DispatchContext::for_channel(HEARTBEAT_CHANNEL)),
    );
    let outcome = handle.wait().map_err(|err| err.to_string())?;
    let reply = outcome.reply_text();
    let reply = reply.trim();
    if reply.is_empty() || reply == HEARTBEAT_OK {
        return Ok(None);
    }

    gateway.log().info("heartbeat.reply", &format!("chars={}", reply.len()));
    if let Some((channel, target)) = settings.heartbeat_route() {
        gateway.reply(&channel, &target, reply);
    }
    Ok(Some(reply.to_string()))
}
