use super::CommandContext;
use crate::channels::builtin_adapters;
use crate::queue::OutboundQueue;
use crate::runtime::{build_channel_manager, is_process_alive, load_runtime_state, runtime_log};
use crate::shared::time::format_millis;

pub fn cmd_outbound(context: &CommandContext, args: &[String]) -> Result<String, String> {
    match args.first().map(String::as_str) {
        Some("list") => cmd_outbound_list(context),
        Some("replay") => cmd_outbound_replay(context),
        Some(other) => Err(format!("unknown outbound command `{other}`")),
        None => Err("usage: outbound list|replay".to_string()),
    }
}

fn cmd_outbound_list(context: &CommandContext) -> Result<String, String> {
    let queue = OutboundQueue::open(context.paths.outbound_queue_path());
    let pending = queue.pending().map_err(|e| e.to_string())?;
    if pending.is_empty() {
        return Ok("pending=0".to_string());
    }
    let mut lines = vec![format!("pending={}", pending.len())];
    for record in pending {
        lines.push(format!(
            "{} channel={} target={} attempts={} created_at={} last_error={}",
            record.id,
            record.channel,
            record.target,
            record.attempts,
            format_millis(record.created_at),
            record.last_error.as_deref().unwrap_or("none")
        ));
    }
    Ok(lines.join("\n"))
}

/// Refused while a gateway owns the queue; its replay worker covers the same ground.
fn cmd_outbound_replay(context: &CommandContext) -> Result<String, String> {
    let state = load_runtime_state(&context.paths).map_err(|e| e.to_string())?;
    if let (true, Some(pid)) = (state.running, state.pid) {
        if is_process_alive(pid) {
            return Err(format!(
                "gateway is running (pid={pid}); its replay worker owns the outbound queue"
            ));
        }
    }
    let settings = context.settings()?;
    context.ensure_state_root()?;
    let log = runtime_log(&context.paths);
    let manager = build_channel_manager(
        &context.paths,
        &settings,
        builtin_adapters(&settings.channels),
        log,
    );
    if manager.queue().is_none() {
        return Err("outbound queue is disabled (`outbound.enabled: false`)".to_string());
    }
    manager.start();
    let report = manager.replay();
    manager.stop();
    let report = report.map_err(|e| e.to_string())?;
    Ok(format!(
        "replayed={} failed={}",
        report.replayed, report.failed
    ))
}
