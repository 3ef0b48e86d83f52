use crate::channels::{ChannelManager, ReplayReport};
use crate::shared::logging::RuntimeLog;

/// One replay pass over the outbound queue.
pub fn tick_replay(channels: &ChannelManager, log: &RuntimeLog) -> Result<ReplayReport, String> {
    let report = channels.replay().map_err(|err| err.to_string())?;
    if report.replayed + report.failed > 0 {
        log.info(
            "outbound.replay",
            &format!("replayed={} failed={}", report.replayed, report.failed),
        );
    }
    Ok(report)
}
