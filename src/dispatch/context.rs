use serde::{Deserialize, Serialize};

/// Where a dispatched message came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchContext {
    pub channel: Option<String>,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub chat_id: Option<String>,
}

impl DispatchContext {
    pub fn for_channel(channel: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
            ..Self::default()
        }
    }

    /// `[Channel: X] [User: Y] ` prefix, or the bare message without a channel.
    pub fn tag_message(&self, message: &str) -> String {
        let Some(channel) = self.channel.as_deref() else {
            return message.to_string();
        };
        let user = self
            .sender_name
            .as_deref()
            .or(self.sender_id.as_deref())
            .unwrap_or("unknown");
        format!("[Channel: {channel}] [User: {user}] {message}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_prefers_name_then_id_then_unknown() {
        let mut ctx = DispatchContext {
            channel: Some("telegram".to_string()),
            sender_id: Some("42".to_string()),
            sender_name: Some("Ada".to_string()),
            chat_id: Some("c1".to_string()),
        };
        assert_eq!(ctx.tag_message("hi"), "[Channel: telegram] [User: Ada] hi");

        ctx.sender_name = None;
        assert_eq!(ctx.tag_message("hi"), "[Channel: telegram] [User: 42] hi");

        ctx.sender_id = None;
        assert_eq!(
            ctx.tag_message("hi"),
            "[Channel: telegram] [User: unknown] hi"
        );
    }

    #[test]
    fn no_channel_means_no_prefix() {
        let ctx = DispatchContext {
            sender_name: Some("Ada".to_string()),
            ..DispatchContext::default()
        };
        assert_eq!(ctx.tag_message("plain"), "plain");
    }
}
