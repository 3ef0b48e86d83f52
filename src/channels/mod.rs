use crate::config::ChannelConfig;
use crate::queue::QueueError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod manager;
pub mod policy;
pub mod push;
pub mod status;

pub use manager::{ChannelManager, ReplayReport};
pub use push::{PushAdapter, PUSH_CHANNEL_ID};
pub use status::ChannelStatus;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("no adapter registered for channel `{0}`")]
    UnknownChannel(String),
    #[error("channel `{channel}` is not started")]
    NotStarted { channel: String },
    #[error("channel `{channel}` is missing credential `{key}`")]
    MissingCredential { channel: String, key: String },
    #[error("channel `{channel}` is misconfigured: {reason}")]
    InvalidConfig { channel: String, reason: String },
    #[error("delivery on channel `{channel}` failed: {reason}")]
    Delivery { channel: String, reason: String },
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Inbound message handed to the registered handler exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub channel: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub text: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReply {
    pub channel: String,
    pub chat_id: String,
    pub text: String,
}

impl ChannelReply {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            text: text.into(),
        }
    }
}

pub type MessageHandler = Arc<dyn Fn(ChannelMessage) + Send + Sync>;

/// A messaging platform connection. Implementations are shared across
/// threads and use interior mutability for their connection state.
pub trait ChannelAdapter: Send + Sync {
    fn id(&self) -> &str;
    fn start(&self, config: &ChannelConfig) -> Result<(), ChannelError>;
    fn stop(&self) -> Result<(), ChannelError>;
    fn send(&self, reply: &ChannelReply) -> Result<(), ChannelError>;
    fn set_message_handler(&self, handler: MessageHandler);
}

/// Adapters this crate ships for the channels named in `configs`.
pub fn builtin_adapters(configs: &BTreeMap<String, ChannelConfig>) -> Vec<Arc<dyn ChannelAdapter>> {
    let mut adapters: Vec<Arc<dyn ChannelAdapter>> = Vec::new();
    if configs.contains_key(PUSH_CHANNEL_ID) {
        adapters.push(Arc::new(PushAdapter::new()));
    }
    adapters
}
