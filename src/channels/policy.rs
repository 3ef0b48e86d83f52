use super::{ChannelMessage, MessageHandler};
use crate::config::ChannelConfig;
use crate::shared::logging::RuntimeLog;
use std::sync::{Arc, Mutex, PoisonError};

pub type HandlerSlot = Arc<Mutex<Option<MessageHandler>>>;

/// Handler installed on an adapter: drops senders outside the channel's
/// allow-list, then forwards to whatever handler currently occupies `slot`.
pub fn guarded_handler(
    channel: &str,
    config: &ChannelConfig,
    slot: HandlerSlot,
    log: RuntimeLog,
) -> MessageHandler {
    let channel = channel.to_string();
    let config = config.clone();
    Arc::new(move |message: ChannelMessage| {
        if !config.permits(&message.sender_id) {
            log.warn(
                "channel.inbound.rejected",
                &format!("channel={channel} sender={}", message.sender_id),
            );
            return;
        }
        let handler = slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(message);
        }
    })
}
