use crate::config::{ApprovalSettings, EngineSettings};
use crate::engine::stream_parse::{parse_stream_line, StreamItem};
use crate::engine::{
    io_error, AgentEngine, EngineError, EngineEvent, EngineRequest, EngineResult,
};
use crate::shared::logging::RuntimeLog;
use serde_json::Value;
use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Drives a CLI agent binary that speaks `stream-json` on stdout.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    binary: String,
    timeout: Duration,
    gated_tools: BTreeSet<String>,
    log: RuntimeLog,
}

impl ProcessEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_secs(900),
            gated_tools: BTreeSet::new(),
            log: RuntimeLog::disabled(),
        }
    }

    pub fn from_settings(engine: &EngineSettings, approvals: &ApprovalSettings) -> Self {
        Self::new(engine.binary.clone())
            .with_timeout(Duration::from_secs(engine.timeout_seconds))
            .with_gated_tools(approvals.gated_tools.iter().cloned())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_gated_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gated_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_log(mut self, log: RuntimeLog) -> Self {
        self.log = log;
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn is_gated(&self, tool: &str) -> bool {
        self.gated_tools.contains(tool)
    }

    fn kill_for_timeout(&self, child: &mut Child) -> EngineError {
        let _ = child.kill();
        let _ = child.wait();
        EngineError::Timeout {
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    /// Returns `Err` once the approver refuses a gated tool; the child is
    /// killed and a closing `result` event has been emitted by then.
    fn gate_tool(
        &self,
        request: &EngineRequest,
        tool: &str,
        input: &Value,
        session_id: &str,
        child: &mut Child,
        sink: &mut dyn FnMut(EngineEvent),
    ) -> Result<(), EngineError> {
        if !self.is_gated(tool) {
            return Ok(());
        }
        let Some(approver) = request.approver.as_ref() else {
            return Ok(());
        };
        if approver.approve(tool, input) {
            return Ok(());
        }

        let message = format!("Tool `{tool}` was blocked: approval denied.");
        self.log.warn("engine.tool_denied", &format!("tool={tool}"));
        sink(EngineEvent::Text {
            text: message.clone(),
        });
        let _ = child.kill();
        let _ = child.wait();
        sink(EngineEvent::Result(EngineResult {
            session_id: session_id.to_string(),
            cost: 0.0,
            turns: 0,
            result: None,
            errors: vec![message],
        }));
        Err(EngineError::ToolDenied {
            tool: tool.to_string(),
        })
    }
}

pub fn build_args(request: &EngineRequest) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        request.prompt.clone(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
        "--model".to_string(),
        request.model.clone(),
        "--max-turns".to_string(),
        request.max_turns.to_string(),
    ];
    if let Some(session) = request
        .resume_session
        .as_deref()
        .filter(|session| !session.trim().is_empty())
    {
        args.push("--resume".to_string());
        args.push(session.to_string());
    }
    args
}

impl AgentEngine for ProcessEngine {
    fn run(
        &self,
        request: &EngineRequest,
        sink: &mut dyn FnMut(EngineEvent),
    ) -> Result<(), EngineError> {
        let mut command = Command::new(&self.binary);
        command
            .current_dir(&request.workspace)
            .args(build_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::MissingBinary {
                    binary: self.binary.clone(),
                })
            }
            Err(err) => return Err(io_error(&request.workspace, err)),
        };

        let stdout = child.stdout.take().ok_or_else(|| {
            io_error(
                &request.workspace,
                std::io::Error::other("missing stdout pipe"),
            )
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            io_error(
                &request.workspace,
                std::io::Error::other("missing stderr pipe"),
            )
        })?;

        let (line_tx, line_rx) = mpsc::channel::<String>();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else {
                    break;
                };
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        });
        let stderr_reader = thread::spawn(move || {
            let mut buf = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut buf);
            buf
        });

        let deadline = Instant::now() + self.timeout;
        let mut session_id = request.resume_session.clone().unwrap_or_default();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.kill_for_timeout(&mut child));
            }
            match line_rx.recv_timeout(remaining.min(Duration::from_millis(250))) {
                Ok(line) => {
                    for item in parse_stream_line(&line) {
                        match item {
                            StreamItem::Event(event) => {
                                if let EngineEvent::Init { session_id: id } = &event {
                                    session_id = id.clone();
                                }
                                sink(event);
                            }
                            StreamItem::ToolUse { name, input } => {
                                sink(EngineEvent::ToolStart { tool: name.clone() });
                                self.gate_tool(
                                    request,
                                    &name,
                                    &input,
                                    &session_id,
                                    &mut child,
                                    sink,
                                )?;
                            }
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        return Err(self.kill_for_timeout(&mut child));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => return Err(io_error(&request.workspace, err)),
            }
        };
        let stderr = stderr_reader.join().unwrap_or_default();

        if !status.success() {
            return Err(EngineError::NonZeroExit {
                exit_code: status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}
