//! Outbound-only webhook channel.

use super::{ChannelAdapter, ChannelError, ChannelReply, MessageHandler};
use crate::config::ChannelConfig;
use serde_json::json;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const PUSH_CHANNEL_ID: &str = "push";

const PUSH_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
struct PushTarget {
    endpoint: String,
    token: Option<String>,
}

#[derive(Debug, Default)]
pub struct PushAdapter {
    target: Mutex<Option<PushTarget>>,
}

impl PushAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.target().is_some()
    }

    fn target(&self) -> MutexGuard<'_, Option<PushTarget>> {
        self.target.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChannelAdapter for PushAdapter {
    fn id(&self) -> &str {
        PUSH_CHANNEL_ID
    }

    fn start(&self, config: &ChannelConfig) -> Result<(), ChannelError> {
        let endpoint = config
            .credential("endpoint")
            .ok_or_else(|| ChannelError::MissingCredential {
                channel: PUSH_CHANNEL_ID.to_string(),
                key: "endpoint".to_string(),
            })?;
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ChannelError::InvalidConfig {
                channel: PUSH_CHANNEL_ID.to_string(),
                reason: format!("endpoint `{endpoint}` must be an http(s) url"),
            });
        }
        *self.target() = Some(PushTarget {
            endpoint: endpoint.to_string(),
            token: config.credential("token").map(str::to_string),
        });
        Ok(())
    }

    fn stop(&self) -> Result<(), ChannelError> {
        *self.target() = None;
        Ok(())
    }

    fn send(&self, reply: &ChannelReply) -> Result<(), ChannelError> {
        let target = self
            .target()
            .clone()
            .ok_or_else(|| ChannelError::NotStarted {
                channel: PUSH_CHANNEL_ID.to_string(),
            })?;

        let mut request = ureq::post(&target.endpoint).timeout(PUSH_REQUEST_TIMEOUT);
        if let Some(token) = target.token.as_deref() {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        let body = json!({
            "target": reply.chat_id,
            "text": reply.text,
            "channel": reply.channel,
        });
        match request.send_json(body) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => Err(ChannelError::Delivery {
                channel: PUSH_CHANNEL_ID.to_string(),
                reason: format!("endpoint returned status {code}"),
            }),
            Err(err) => Err(ChannelError::Delivery {
                channel: PUSH_CHANNEL_ID.to_string(),
                reason: err.to_string(),
            }),
        }
    }

    fn set_message_handler(&self, _handler: MessageHandler) {}
}
