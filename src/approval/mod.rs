//! Turns an out-of-band human decision into a bounded blocking wait.
//!
//! Each request owns a timer thread. Whichever of the response or the timer
//! removes the pending entry first delivers the single outcome; later
//! responses find nothing to remove and are ignored.

pub mod wire;

pub use wire::{ApprovalRequest, ApprovalResponse};

use crate::engine::ToolApprover;
use crate::shared::ids::generate_id;
use crate::shared::logging::RuntimeLog;
use crate::shared::time::now_millis;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(60);

pub type ApprovalSender = Arc<dyn Fn(&ApprovalRequest) -> Result<(), String> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("malformed approval response: {0}")]
    MalformedResponse(#[source] serde_json::Error),
}

struct PendingApproval {
    resolve: Sender<bool>,
    cancel: Sender<()>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingApproval>>>;

pub struct ApprovalBridge {
    timeout: Duration,
    send: ApprovalSender,
    pending: PendingMap,
    log: RuntimeLog,
}

/// Caller side of one approval request.
#[derive(Debug)]
pub struct ApprovalTicket {
    id: String,
    decision: Receiver<bool>,
}

impl ApprovalTicket {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Blocks until the request is approved, denied or timed out. A vanished
    /// resolver counts as a denial.
    pub fn wait(self) -> bool {
        self.decision.recv().unwrap_or(false)
    }

    pub fn try_decision(&self) -> Option<bool> {
        self.decision.try_recv().ok()
    }
}

impl ApprovalBridge {
    pub fn new<F>(timeout: Duration, send: F) -> Self
    where
        F: Fn(&ApprovalRequest) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            timeout,
            send: Arc::new(send),
            pending: Arc::new(Mutex::new(HashMap::new())),
            log: RuntimeLog::disabled(),
        }
    }

    pub fn with_log(mut self, log: RuntimeLog) -> Self {
        self.log = log;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn request_approval(&self, tool_name: &str, args: Value) -> ApprovalTicket {
        let (resolve_tx, resolve_rx) = mpsc::channel::<bool>();
        let id = match generate_id("apr", now_millis()) {
            Ok(id) => id,
            Err(err) => {
                self.log.error(
                    "approval.send_failed",
                    &format!("tool={tool_name} reason=id generation failed: {err}"),
                );
                let _ = resolve_tx.send(false);
                return ApprovalTicket {
                    id: String::new(),
                    decision: resolve_rx,
                };
            }
        };

        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        lock(&self.pending).insert(
            id.clone(),
            PendingApproval {
                resolve: resolve_tx,
                cancel: cancel_tx,
            },
        );
        self.spawn_timer(id.clone(), cancel_rx);

        let request = ApprovalRequest {
            id: id.clone(),
            tool_name: tool_name.to_string(),
            args,
            timeout: self.timeout.as_millis() as u64,
        };
        self.log.info(
            "approval.requested",
            &format!("id={id} tool={tool_name} timeout_ms={}", request.timeout),
        );
        if let Err(reason) = (self.send)(&request) {
            self.log.warn(
                "approval.send_failed",
                &format!("id={id} tool={tool_name} reason={reason}"),
            );
            self.resolve(&id, false);
        }

        ApprovalTicket {
            id,
            decision: resolve_rx,
        }
    }

    /// Returns whether a pending request was resolved. Unknown or already
    /// resolved ids are ignored.
    pub fn handle_response(&self, response: &ApprovalResponse) -> bool {
        let resolved = self.resolve(&response.id, response.approved);
        if resolved {
            self.log.info(
                "approval.resolved",
                &format!("id={} approved={}", response.id, response.approved),
            );
        }
        resolved
    }

    pub fn handle_response_json(&self, raw: &str) -> Result<bool, ApprovalError> {
        let response: ApprovalResponse =
            serde_json::from_str(raw).map_err(ApprovalError::MalformedResponse)?;
        Ok(self.handle_response(&response))
    }

    fn resolve(&self, id: &str, approved: bool) -> bool {
        let Some(entry) = lock(&self.pending).remove(id) else {
            return false;
        };
        let _ = entry.cancel.send(());
        let _ = entry.resolve.send(approved);
        true
    }

    fn spawn_timer(&self, id: String, cancel: Receiver<()>) {
        let pending = Arc::clone(&self.pending);
        let timeout = self.timeout;
        let log = self.log.clone();
        thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = cancel.recv_timeout(timeout) {
                let expired = lock(&pending).remove(&id);
                if let Some(entry) = expired {
                    let _ = entry.resolve.send(false);
                    log.info("approval.timed_out", &format!("id={id}"));
                }
            }
        });
    }
}

impl ToolApprover for ApprovalBridge {
    fn approve(&self, tool_name: &str, args: &Value) -> bool {
        self.request_approval(tool_name, args.clone()).wait()
    }
}

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<String, PendingApproval>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    fn capturing_bridge(timeout: Duration) -> (ApprovalBridge, Receiver<ApprovalRequest>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let bridge = ApprovalBridge::new(timeout, move |request| {
            tx.lock()
                .map_err(|_| "sender poisoned".to_string())?
                .send(request.clone())
                .map_err(|err| err.to_string())
        });
        (bridge, rx)
    }

    #[test]
    fn approved_response_resolves_true_and_clears_pending() {
        let (bridge, requests) = capturing_bridge(Duration::from_secs(5));
        let ticket = bridge.request_approval("Bash", json!({"command": "ls"}));

        let sent = requests.recv_timeout(Duration::from_secs(1)).expect("sent");
        assert_eq!(sent.id, ticket.id());
        assert_eq!(sent.tool_name, "Bash");
        assert_eq!(sent.timeout, 5_000);
        assert_eq!(bridge.pending_count(), 1);

        assert!(bridge.handle_response(&ApprovalResponse::approve(sent.id.clone())));
        assert!(ticket.wait());
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn denial_wins_and_duplicate_responses_are_ignored() {
        let (bridge, requests) = capturing_bridge(Duration::from_secs(5));
        let ticket = bridge.request_approval("Write", json!({}));
        let sent = requests.recv().expect("sent");

        assert!(bridge.handle_response(&ApprovalResponse::deny(sent.id.clone())));
        assert!(!bridge.handle_response(&ApprovalResponse::approve(sent.id.clone())));
        assert!(!ticket.wait());
    }

    #[test]
    fn unanswered_request_times_out_as_denied() {
        let (bridge, _requests) = capturing_bridge(Duration::from_millis(50));
        let started = Instant::now();
        let ticket = bridge.request_approval("Bash", json!({}));
        let id = ticket.id().to_string();

        assert!(!ticket.wait());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(bridge.pending_count(), 0);
        assert!(!bridge.handle_response(&ApprovalResponse::approve(id)));
    }

    #[test]
    fn unknown_ids_do_not_disturb_pending_requests() {
        let (bridge, requests) = capturing_bridge(Duration::from_secs(5));
        let ticket = bridge.request_approval("Bash", json!({}));
        let sent = requests.recv().expect("sent");

        assert!(!bridge.handle_response(&ApprovalResponse::approve("apr-nope")));
        assert_eq!(bridge.pending_count(), 1);
        assert!(ticket.try_decision().is_none());

        bridge.handle_response(&ApprovalResponse::approve(sent.id));
        assert!(ticket.wait());
    }

    #[test]
    fn send_failure_fails_closed_immediately() {
        let bridge = ApprovalBridge::new(Duration::from_secs(30), |_request| {
            Err("no client connected".to_string())
        });
        let started = Instant::now();
        let ticket = bridge.request_approval("Bash", json!({}));
        assert!(!ticket.wait());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn json_responses_are_parsed_and_malformed_frames_rejected() {
        let (bridge, requests) = capturing_bridge(Duration::from_secs(5));
        let ticket = bridge.request_approval("Bash", json!({}));
        let sent = requests.recv().expect("sent");

        let raw = format!(r#"{{"id":"{}","approved":true}}"#, sent.id);
        assert!(bridge.handle_response_json(&raw).expect("parsed"));
        assert!(ticket.wait());

        assert!(matches!(
            bridge.handle_response_json("{\"id\":1}"),
            Err(ApprovalError::MalformedResponse(_))
        ));
        assert!(!bridge
            .handle_response_json(r#"{"id":"apr-x","approved":true}"#)
            .expect("unknown id is not an error"));
    }
}
