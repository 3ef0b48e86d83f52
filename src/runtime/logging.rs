use super::StatePaths;
use crate::shared::logging::RuntimeLog;

pub fn runtime_log(paths: &StatePaths) -> RuntimeLog {
    RuntimeLog::at(paths.runtime_log_path())
}

pub fn append_runtime_log(paths: &StatePaths, level: &str, event: &str, message: &str) {
    runtime_log(paths).record(level, event, message);
}
