use super::CommandContext;
use crate::runtime::{
    append_runtime_log, is_process_alive, load_runtime_state, run_gateway, signal_stop,
};

pub fn cmd_start(context: &CommandContext) -> Result<String, String> {
    let settings = context.settings()?;
    context.ensure_state_root()?;
    append_runtime_log(
        &context.paths,
        "info",
        "gateway.start.requested",
        &format!("config={}", context.config_path.display()),
    );
    run_gateway(&context.paths.root, &settings).map_err(|e| e.to_string())?;
    Ok(format!(
        "stopped\nstate_root={}",
        context.paths.root.display()
    ))
}

pub fn cmd_stop(context: &CommandContext) -> Result<String, String> {
    let state = load_runtime_state(&context.paths).map_err(|e| e.to_string())?;
    let pid = match state.pid {
        Some(pid) if state.running && is_process_alive(pid) => pid,
        _ => return Ok("stopped\nrunning=false".to_string()),
    };
    signal_stop(&context.paths).map_err(|e| e.to_string())?;
    append_runtime_log(
        &context.paths,
        "info",
        "gateway.stop.requested",
        &format!("pid={pid}"),
    );
    Ok(format!("stop requested\npid={pid}"))
}

pub fn cmd_status(context: &CommandContext) -> Result<String, String> {
    let state = load_runtime_state(&context.paths).map_err(|e| e.to_string())?;
    let alive = state.running && state.pid.map(is_process_alive).unwrap_or(false);
    let none = || "none".to_string();

    let mut lines = vec![
        format!("running={alive}"),
        format!("pid={}", state.pid.map(|v| v.to_string()).unwrap_or_else(none)),
        format!(
            "started_at={}",
            state.started_at.map(|v| v.to_string()).unwrap_or_else(none)
        ),
        format!(
            "stopped_at={}",
            state.stopped_at.map(|v| v.to_string()).unwrap_or_else(none)
        ),
        format!(
            "last_error={}",
            state.last_error.clone().unwrap_or_else(none)
        ),
    ];
    if state.running && !alive {
        lines.push("stale=true".to_string());
    }
    for (channel, status) in &state.channels {
        lines.push(format!("channel:{channel}.status={status}"));
    }
    for (id, worker) in &state.workers {
        lines.push(format!("worker:{id}.state={:?}", worker.state).to_lowercase());
        lines.push(format!(
            "worker:{id}.last_heartbeat={}",
            worker
                .last_heartbeat
                .map(|v| v.to_string())
                .unwrap_or_else(none)
        ));
        lines.push(format!(
            "worker:{id}.last_error={}",
            worker.last_error.clone().unwrap_or_else(none)
        ));
    }
    Ok(lines.join("\n"))
}
