//! Serializes agent invocations for one workspace.
//!
//! Entries are appended to a FIFO channel and drained by a single worker
//! thread, so at most one engine invocation runs at any instant.

pub mod context;
pub mod handle;

pub use context::DispatchContext;
pub use handle::{DispatchHandle, DispatchOutcome, DispatchResult};

use crate::config::Settings;
use crate::engine::{AgentEngine, EngineError, EngineEvent, EngineRequest, ToolApprover};
use crate::shared::logging::RuntimeLog;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("timed out after {timeout_ms}ms waiting for dispatch")]
    WaitTimeout { timeout_ms: u64 },
    #[error("dispatcher is closed")]
    Closed,
}

pub type EventSink = Box<dyn FnMut(EngineEvent) + Send>;

#[derive(Clone)]
pub struct DispatcherConfig {
    pub workspace: PathBuf,
    pub model: String,
    pub max_turns: u32,
    pub approver: Option<Arc<dyn ToolApprover>>,
    pub log: RuntimeLog,
}

impl DispatcherConfig {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            model: "sonnet".to_string(),
            max_turns: 25,
            approver: None,
            log: RuntimeLog::disabled(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            workspace: settings.workspace.clone(),
            model: settings.engine.model.clone(),
            max_turns: settings.engine.max_turns,
            approver: None,
            log: RuntimeLog::disabled(),
        }
    }

    pub fn with_approver(mut self, approver: Arc<dyn ToolApprover>) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn with_log(mut self, log: RuntimeLog) -> Self {
        self.log = log;
        self
    }
}

struct QueueEntry {
    message: String,
    session_id: Option<String>,
    on_event: EventSink,
    context: Option<DispatchContext>,
    completion: Sender<DispatchResult>,
}

pub struct Dispatcher {
    entries: Sender<QueueEntry>,
    waiting: Arc<AtomicUsize>,
    busy: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl Dispatcher {
    pub fn new(engine: Arc<dyn AgentEngine>, config: DispatcherConfig) -> Self {
        let (entries, receiver) = mpsc::channel::<QueueEntry>();
        let waiting = Arc::new(AtomicUsize::new(0));
        let busy = Arc::new(AtomicBool::new(false));
        let worker = {
            let waiting = Arc::clone(&waiting);
            let busy = Arc::clone(&busy);
            thread::spawn(move || run_worker(engine, config, receiver, waiting, busy))
        };
        Self {
            entries,
            waiting,
            busy,
            worker,
        }
    }

    /// Queues `message` behind everything already submitted. Never runs the
    /// engine on the calling thread.
    pub fn dispatch<F>(
        &self,
        message: impl Into<String>,
        session_id: Option<String>,
        on_event: F,
        context: Option<DispatchContext>,
    ) -> DispatchHandle
    where
        F: FnMut(EngineEvent) + Send + 'static,
    {
        let (completion, receiver) = mpsc::channel();
        let entry = QueueEntry {
            message: message.into(),
            session_id,
            on_event: Box::new(on_event),
            context,
            completion,
        };
        self.waiting.fetch_add(1, Ordering::SeqCst);
        if self.entries.send(entry).is_err() {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
        DispatchHandle::new(receiver)
    }

    /// Independent dispatches collected in submission order; one failure
    /// does not affect the others.
    pub fn dispatch_batch<I, S>(&self, messages: I) -> Vec<DispatchResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let handles = messages
            .into_iter()
            .map(|message| self.dispatch(message, None, |_| {}, None))
            .collect::<Vec<_>>();
        handles.into_iter().map(DispatchHandle::wait).collect()
    }

    /// Entries submitted but not yet started.
    pub fn queue_len(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Closes the queue and waits for already queued entries to finish.
    pub fn shutdown(self) {
        let Self { entries, worker, .. } = self;
        drop(entries);
        let _ = worker.join();
    }
}

fn run_worker(
    engine: Arc<dyn AgentEngine>,
    config: DispatcherConfig,
    receiver: Receiver<QueueEntry>,
    waiting: Arc<AtomicUsize>,
    busy: Arc<AtomicBool>,
) {
    while let Ok(mut entry) = receiver.recv() {
        busy.store(true, Ordering::SeqCst);
        waiting.fetch_sub(1, Ordering::SeqCst);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            execute(engine.as_ref(), &config, &mut entry)
        }))
        .unwrap_or_else(|_| {
            Err(DispatchError::Engine(EngineError::Failed {
                reason: "engine panicked".to_string(),
            }))
        });
        if let Err(err) = &result {
            config.log.warn(
                "dispatch.failed",
                &format!(
                    "channel={} error={err}",
                    entry
                        .context
                        .as_ref()
                        .and_then(|ctx| ctx.channel.as_deref())
                        .unwrap_or("-")
                ),
            );
        }

        busy.store(false, Ordering::SeqCst);
        let _ = entry.completion.send(result);
    }
}

fn execute(
    engine: &dyn AgentEngine,
    config: &DispatcherConfig,
    entry: &mut QueueEntry,
) -> DispatchResult {
    let prompt = match entry.context.as_ref() {
        Some(context) => context.tag_message(&entry.message),
        None => entry.message.clone(),
    };
    let request = EngineRequest {
        prompt,
        resume_session: entry.session_id.clone(),
        workspace: config.workspace.clone(),
        model: config.model.clone(),
        max_turns: config.max_turns,
        approver: config.approver.clone(),
    };

    let mut outcome = DispatchOutcome::default();
    let on_event = &mut entry.on_event;
    engine.run(&request, &mut |event: EngineEvent| {
        outcome.observe(&event);
        on_event(event);
    })?;
    Ok(outcome)
}
