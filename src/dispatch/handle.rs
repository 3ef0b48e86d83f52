use super::DispatchError;
use crate::engine::{EngineEvent, EngineResult};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

/// What one completed invocation produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutcome {
    pub session_id: Option<String>,
    pub result: Option<EngineResult>,
    pub text: Vec<String>,
}

impl DispatchOutcome {
    pub(crate) fn observe(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::Init { session_id } => self.session_id = Some(session_id.clone()),
            EngineEvent::Text { text } => self.text.push(text.clone()),
            EngineEvent::Result(result) => {
                if !result.session_id.is_empty() {
                    self.session_id = Some(result.session_id.clone());
                }
                self.result = Some(result.clone());
            }
            EngineEvent::ToolStart { .. } | EngineEvent::ToolEnd => {}
        }
    }

    /// The final `result` text when the engine gave one, else the streamed text.
    pub fn reply_text(&self) -> String {
        if let Some(reply) = self
            .result
            .as_ref()
            .and_then(|result| result.result.as_deref())
            .filter(|reply| !reply.trim().is_empty())
        {
            return reply.to_string();
        }
        self.text.join("\n")
    }
}

pub type DispatchResult = Result<DispatchOutcome, DispatchError>;

#[derive(Debug)]
pub struct DispatchHandle {
    receiver: Receiver<DispatchResult>,
}

impl DispatchHandle {
    pub(crate) fn new(receiver: Receiver<DispatchResult>) -> Self {
        Self { receiver }
    }

    pub fn wait(self) -> DispatchResult {
        self.receiver.recv().unwrap_or(Err(DispatchError::Closed))
    }

    /// Gives up waiting after `timeout`; the entry itself keeps its place.
    pub fn wait_timeout(&self, timeout: Duration) -> DispatchResult {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(DispatchError::WaitTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(DispatchError::Closed),
        }
    }
}
