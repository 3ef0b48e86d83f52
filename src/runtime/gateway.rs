//! Wires channels, the dispatcher and the approval bridge into one gateway.

use crate::approval::{ApprovalBridge, ApprovalRequest, ApprovalResponse};
use crate::channels::{ChannelManager, ChannelMessage, ChannelReply};
use crate::config::Settings;
use crate::dispatch::{
    DispatchContext, DispatchHandle, DispatchResult, Dispatcher, DispatcherConfig,
};
use crate::engine::{AgentEngine, ToolApprover};
use crate::shared::logging::RuntimeLog;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

pub const BUSY_REPLY: &str = "Busy right now, please try again in a moment.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalCommand {
    Approve(String),
    Deny(String),
    /// `/approve` or `/deny` without an id.
    MissingId,
}

pub fn parse_approval_command(text: &str) -> Option<ApprovalCommand> {
    let mut parts = text.split_whitespace();
    let verb = parts.next()?;
    let approved = match verb {
        "/approve" => true,
        "/deny" => false,
        _ => return None,
    };
    let Some(id) = parts.next() else {
        return Some(ApprovalCommand::MissingId);
    };
    Some(if approved {
        ApprovalCommand::Approve(id.to_string())
    } else {
        ApprovalCommand::Deny(id.to_string())
    })
}

pub fn render_approval_prompt(request: &ApprovalRequest) -> String {
    format!(
        "Approval needed: the agent wants to run `{tool}` with {args}.\nReply `/approve {id}` or `/deny {id}` within {secs}s.",
        tool = request.tool_name,
        args = request.args,
        id = request.id,
        secs = request.timeout / 1000,
    )
}

type SessionKey = (String, String);

/// A dispatched inbound message waiting for its reply.
struct PendingReply {
    handle: DispatchHandle,
    channel: String,
    chat_id: String,
}

struct GatewayInner {
    dispatcher: Dispatcher,
    channels: Arc<ChannelManager>,
    approvals: Arc<ApprovalBridge>,
    sessions: Mutex<HashMap<SessionKey, String>>,
    completions: Sender<PendingReply>,
    max_pending: Option<usize>,
    log: RuntimeLog,
}

#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    pub fn new(
        engine: Arc<dyn AgentEngine>,
        channels: ChannelManager,
        settings: &Settings,
        log: RuntimeLog,
    ) -> Self {
        let channels = Arc::new(channels);
        let approvals = Arc::new(approval_bridge(settings, Arc::clone(&channels), log.clone()));
        let dispatcher = Dispatcher::new(
            engine,
            DispatcherConfig::from_settings(settings)
                .with_approver(Arc::clone(&approvals) as Arc<dyn ToolApprover>)
                .with_log(log.clone()),
        );
        let (completions, pending) = mpsc::channel();
        let inner = Arc::new(GatewayInner {
            dispatcher,
            channels,
            approvals,
            sessions: Mutex::new(HashMap::new()),
            completions,
            max_pending: settings.dispatch.max_pending,
            log,
        });
        let weak = Arc::downgrade(&inner);
        thread::spawn(move || run_completions(weak, pending));
        Self { inner }
    }

    /// Registers the gateway as the channel manager's inbound handler.
    pub fn install(&self) {
        let weak: Weak<GatewayInner> = Arc::downgrade(&self.inner);
        self.inner.channels.on_message(move |message| {
            if let Some(inner) = weak.upgrade() {
                Gateway { inner }.handle_inbound(message);
            }
        });
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.inner.channels
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn approvals(&self) -> &Arc<ApprovalBridge> {
        &self.inner.approvals
    }

    pub fn log(&self) -> &RuntimeLog {
        &self.inner.log
    }

    pub fn session_for(&self, channel: &str, chat_id: &str) -> Option<String> {
        self.sessions()
            .get(&(channel.to_string(), chat_id.to_string()))
            .cloned()
    }

    pub fn handle_inbound(&self, message: ChannelMessage) {
        if let Some(command) = parse_approval_command(&message.text) {
            self.handle_approval_command(&message, command);
            return;
        }

        if let Some(max_pending) = self.inner.max_pending {
            if self.inner.dispatcher.queue_len() >= max_pending {
                self.reply(&message.channel, &message.chat_id, BUSY_REPLY);
                return;
            }
        }

        let context = DispatchContext {
            channel: Some(message.channel.clone()),
            sender_id: Some(message.sender_id.clone()),
            sender_name: message.sender_name.clone(),
            chat_id: Some(message.chat_id.clone()),
        };
        let session = self.session_for(&message.channel, &message.chat_id);
        let handle = self
            .inner
            .dispatcher
            .dispatch(message.text.clone(), session, |_| {}, Some(context));

        let pending = PendingReply {
            handle,
            channel: message.channel,
            chat_id: message.chat_id,
        };
        if self.inner.completions.send(pending).is_err() {
            self.inner
                .log
                .error("gateway.reply_dropped", "completion worker is gone");
        }
    }

    fn complete(&self, channel: &str, chat_id: &str, result: DispatchResult) {
        match result {
            Ok(outcome) => {
                if let Some(session_id) = outcome.session_id.clone() {
                    self.sessions()
                        .insert((channel.to_string(), chat_id.to_string()), session_id);
                }
                let reply = outcome.reply_text();
                if !reply.trim().is_empty() {
                    self.reply(channel, chat_id, &reply);
                }
            }
            Err(err) => {
                self.reply(
                    channel,
                    chat_id,
                    &format!("Sorry, that request failed: {err}"),
                );
            }
        }
    }

    fn handle_approval_command(&self, message: &ChannelMessage, command: ApprovalCommand) {
        let text = match command {
            ApprovalCommand::MissingId => "Usage: /approve <id> or /deny <id>".to_string(),
            ApprovalCommand::Approve(id) => {
                if self.inner.approvals.handle_response(&ApprovalResponse::approve(&id)) {
                    format!("Approved {id}.")
                } else {
                    format!("No pending approval {id}.")
                }
            }
            ApprovalCommand::Deny(id) => {
                if self.inner.approvals.handle_response(&ApprovalResponse::deny(&id)) {
                    format!("Denied {id}.")
                } else {
                    format!("No pending approval {id}.")
                }
            }
        };
        self.reply(&message.channel, &message.chat_id, &text);
    }

    /// Delivery failures stay queued for replay; they are only logged here.
    pub fn reply(&self, channel: &str, chat_id: &str, text: &str) {
        if let Err(err) = self
            .inner
            .channels
            .send(&ChannelReply::new(channel, chat_id, text))
        {
            self.inner.log.warn(
                "outbound.delivery_failed",
                &format!("channel={channel} chat={chat_id} error={err}"),
            );
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionKey, String>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Waits on dispatch handles in submission order, which is the order the
/// dispatcher runs them in. Ends once the gateway is dropped.
fn run_completions(gateway: Weak<GatewayInner>, pending: Receiver<PendingReply>) {
    for PendingReply {
        handle,
        channel,
        chat_id,
    } in pending
    {
        let result = handle.wait();
        let Some(inner) = gateway.upgrade() else {
            break;
        };
        Gateway { inner }.complete(&channel, &chat_id, result);
    }
}

/// Prompts go out on a single direct attempt. A prompt that cannot be
/// delivered denies the request at once, so it must never be replayed later.
fn approval_bridge(
    settings: &Settings,
    channels: Arc<ChannelManager>,
    log: RuntimeLog,
) -> ApprovalBridge {
    let route = settings.approval_route();
    ApprovalBridge::new(
        Duration::from_millis(settings.approvals.timeout_ms),
        move |request: &ApprovalRequest| {
            let Some((channel, target)) = route.as_ref() else {
                return Err("no approval notify channel configured".to_string());
            };
            channels
                .send_direct(&ChannelReply::new(
                    channel,
                    target,
                    render_approval_prompt(request),
                ))
                .map_err(|err| err.to_string())
        },
    )
    .with_log(log)
}
