use super::gateway::Gateway;
use super::heartbeat_worker::{configured_heartbeat_interval, tick_heartbeat};
use super::logging::runtime_log;
use super::replay_worker::tick_replay;
use super::worker_primitives::{run_periodic_worker, WorkerContext, WorkerEvent};
use super::worker_registry::{apply_worker_event, WorkerHealth, WorkerState};
use super::{bootstrap_state_root, RuntimeError, StatePaths};
use crate::channels::{builtin_adapters, ChannelAdapter, ChannelManager, ChannelStatus};
use crate::config::Settings;
use crate::engine::{AgentEngine, ProcessEngine};
use crate::queue::OutboundQueue;
use crate::shared::fs_atomic::atomic_write_file;
use crate::shared::logging::RuntimeLog;
use crate::shared::time::now_secs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const REPLAY_WORKER_ID: &str = "outbound_replay";
pub const HEARTBEAT_WORKER_ID: &str = "heartbeat";

const STOP_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RuntimeState {
    pub running: bool,
    pub pid: Option<u32>,
    pub started_at: Option<i64>,
    pub stopped_at: Option<i64>,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelStatus>,
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerHealth>,
    pub last_error: Option<String>,
}

/// The pluggable pieces of a gateway run.
pub struct GatewayParts {
    pub engine: Arc<dyn AgentEngine>,
    pub adapters: Vec<Arc<dyn ChannelAdapter>>,
}

impl GatewayParts {
    pub fn from_settings(settings: &Settings, log: RuntimeLog) -> Self {
        Self {
            engine: Arc::new(
                ProcessEngine::from_settings(&settings.engine, &settings.approvals).with_log(log),
            ),
            adapters: builtin_adapters(&settings.channels),
        }
    }
}

pub fn run_gateway(state_root: &Path, settings: &Settings) -> Result<(), RuntimeError> {
    let paths = StatePaths::new(state_root);
    let parts = GatewayParts::from_settings(settings, runtime_log(&paths));
    run_gateway_with(&paths, settings, parts)
}

/// Builds the channel manager over the outbound queue when one is enabled.
pub fn build_channel_manager(
    paths: &StatePaths,
    settings: &Settings,
    adapters: Vec<Arc<dyn ChannelAdapter>>,
    log: RuntimeLog,
) -> ChannelManager {
    let manager = ChannelManager::new(adapters, settings.channels.clone()).with_log(log);
    if !settings.outbound.enabled {
        return manager;
    }
    manager.with_queue(Arc::new(OutboundQueue::with_max_attempts(
        paths.outbound_queue_path(),
        settings.outbound.max_attempts,
    )))
}

/// Runs in the foreground until the stop signal file appears.
pub fn run_gateway_with(
    paths: &StatePaths,
    settings: &Settings,
    parts: GatewayParts,
) -> Result<(), RuntimeError> {
    bootstrap_state_root(paths)?;
    let previous = load_runtime_state(paths)?;
    if let (true, Some(pid)) = (previous.running, previous.pid) {
        if pid != std::process::id() && is_process_alive(pid) {
            return Err(RuntimeError::AlreadyRunning { pid });
        }
    }
    let _ = fs::remove_file(paths.stop_signal_path());

    let log = runtime_log(paths);
    let manager = build_channel_manager(paths, settings, parts.adapters, log.clone());
    let gateway = Gateway::new(parts.engine, manager, settings, log.clone());
    gateway.install();
    gateway.channels().start();

    let mut state = RuntimeState {
        running: true,
        pid: Some(std::process::id()),
        started_at: Some(now_secs()),
        stopped_at: None,
        channels: gateway.channels().status(),
        workers: BTreeMap::new(),
        last_error: None,
    };
    if let Err(err) = tick_replay(gateway.channels(), &log) {
        log.error("outbound.replay", &format!("startup replay failed: {err}"));
        state.last_error = Some(err);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let (events_tx, events_rx) = mpsc::channel::<WorkerEvent>();
    let mut handles: Vec<JoinHandle<()>> = Vec::new();
    let mut active = BTreeSet::new();

    if gateway.channels().queue().is_some() {
        let context = WorkerContext {
            worker_id: REPLAY_WORKER_ID.to_string(),
            interval: Duration::from_secs(settings.outbound.replay_interval_seconds),
            stop: Arc::clone(&stop),
            events: events_tx.clone(),
        };
        let gateway = gateway.clone();
        let log = log.clone();
        active.insert(REPLAY_WORKER_ID.to_string());
        handles.push(thread::spawn(move || {
            run_periodic_worker(context, || {
                tick_replay(gateway.channels(), &log).map(|_| ())
            })
        }));
    }
    if let Some(interval) = configured_heartbeat_interval(settings) {
        let context = WorkerContext {
            worker_id: HEARTBEAT_WORKER_ID.to_string(),
            interval,
            stop: Arc::clone(&stop),
            events: events_tx.clone(),
        };
        let gateway = gateway.clone();
        let settings = settings.clone();
        active.insert(HEARTBEAT_WORKER_ID.to_string());
        handles.push(thread::spawn(move || {
            run_periodic_worker(context, || {
                tick_heartbeat(&gateway, &settings).map(|_| ())
            })
        }));
    }
    drop(events_tx);
    for worker_id in &active {
        state
            .workers
            .insert(worker_id.clone(), WorkerHealth::default());
    }
    save_runtime_state(paths, &state)?;
    log.info(
        "gateway.started",
        &format!(
            "pid={} channels={} workers={}",
            std::process::id(),
            state.channels.len(),
            active.len()
        ),
    );

    while !stop.load(Ordering::Relaxed) {
        if paths.stop_signal_path().exists() {
            stop.store(true, Ordering::Relaxed);
            log.info("gateway.stop_signal", "stop file detected");
            break;
        }
        match events_rx.recv_timeout(STOP_POLL) {
            Ok(event) => record_worker_event(paths, &log, &gateway, &mut state, &mut active, event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(STOP_POLL),
        }
    }

    let deadline = Instant::now() + shutdown_wait_timeout();
    while !active.is_empty() && Instant::now() < deadline {
        match events_rx.recv_timeout(Duration::from_millis(25)) {
            Ok(event) => record_worker_event(paths, &log, &gateway, &mut state, &mut active, event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    if !active.is_empty() {
        let message = format!(
            "shutdown timeout waiting for workers: {}",
            active.iter().cloned().collect::<Vec<_>>().join(",")
        );
        for worker_id in &active {
            if let Some(worker) = state.workers.get_mut(worker_id) {
                worker.state = WorkerState::Error;
                worker.last_error = Some("shutdown timeout".to_string());
            }
        }
        log.warn("gateway.shutdown_timeout", &message);
        state.last_error = Some(message);
    }
    for handle in handles {
        if handle.is_finished() {
            let _ = handle.join();
        }
    }

    gateway.channels().stop();
    state.channels = gateway.channels().status();
    state.running = false;
    state.pid = None;
    state.stopped_at = Some(now_secs());
    save_runtime_state(paths, &state)?;
    let _ = fs::remove_file(paths.stop_signal_path());
    log.info("gateway.stopped", "gateway stopped cleanly");
    Ok(())
}

fn record_worker_event(
    paths: &StatePaths,
    log: &RuntimeLog,
    gateway: &Gateway,
    state: &mut RuntimeState,
    active: &mut BTreeSet<String>,
    event: WorkerEvent,
) {
    if let Some(line) = apply_worker_event(&mut state.workers, active, event) {
        log.record(line.level, line.event, &line.message);
    }
    state.channels = gateway.channels().status();
    let _ = save_runtime_state(paths, state);
}

fn shutdown_wait_timeout() -> Duration {
    std::env::var("SWITCHYARD_SHUTDOWN_TIMEOUT_MILLISECONDS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

pub fn signal_stop(paths: &StatePaths) -> Result<(), RuntimeError> {
    let path = paths.stop_signal_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| RuntimeError::CreateDir {
            path: parent.display().to_string(),
            source,
        })?;
    }
    fs::write(&path, b"stop").map_err(|source| RuntimeError::WriteSignal {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_runtime_state(paths: &StatePaths) -> Result<RuntimeState, RuntimeError> {
    let path = paths.runtime_state_path();
    if !path.exists() {
        return Ok(RuntimeState::default());
    }
    let raw = fs::read_to_string(&path).map_err(|source| RuntimeError::ReadState {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| RuntimeError::ParseState {
        path: path.display().to_string(),
        source,
    })
}

pub fn save_runtime_state(paths: &StatePaths, state: &RuntimeState) -> Result<(), RuntimeError> {
    let path = paths.runtime_state_path();
    let encoded = serde_json::to_vec_pretty(state).map_err(|source| RuntimeError::ParseState {
        path: path.display().to_string(),
        source,
    })?;
    atomic_write_file(&path, &encoded).map_err(|source| RuntimeError::WriteState {
        path: path.display().to_string(),
        source,
    })
}

pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        false
    }
}
