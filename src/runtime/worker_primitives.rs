use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const STOP_POLL_STEP: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Started {
        worker_id: String,
        at: i64,
    },
    Heartbeat {
        worker_id: String,
        at: i64,
    },
    Error {
        worker_id: String,
        at: i64,
        message: String,
        fatal: bool,
    },
    Stopped {
        worker_id: String,
        at: i64,
    },
}

/// Returns `false` as soon as `stop` flips, `true` after sleeping `total`.
pub fn sleep_with_stop(stop: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(STOP_POLL_STEP);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !stop.load(Ordering::Relaxed)
}

#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub worker_id: String,
    pub interval: Duration,
    pub stop: Arc<AtomicBool>,
    pub events: Sender<WorkerEvent>,
}

/// Runs `tick` every `interval` until stopped, reporting lifecycle events.
pub fn run_periodic_worker<F>(context: WorkerContext, mut tick: F)
where
    F: FnMut() -> Result<(), String>,
{
    let WorkerContext {
        worker_id,
        interval,
        stop,
        events,
    } = context;
    let now = crate::shared::time::now_secs;

    let _ = events.send(WorkerEvent::Started {
        worker_id: worker_id.clone(),
        at: now(),
    });
    while sleep_with_stop(&stop, interval) {
        let event = match tick() {
            Ok(()) => WorkerEvent::Heartbeat {
                worker_id: worker_id.clone(),
                at: now(),
            },
            Err(message) => WorkerEvent::Error {
                worker_id: worker_id.clone(),
                at: now(),
                message,
                fatal: false,
            },
        };
        let _ = events.send(event);
    }
    let _ = events.send(WorkerEvent::Stopped {
        worker_id,
        at: now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    #[test]
    fn sleep_with_stop_returns_early_when_flagged() {
        let stop = AtomicBool::new(true);
        let started = Instant::now();
        assert!(!sleep_with_stop(&stop, Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));

        let running = AtomicBool::new(false);
        assert!(sleep_with_stop(&running, Duration::from_millis(20)));
    }

    #[test]
    fn periodic_worker_reports_ticks_errors_and_stop() {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn({
            let stop = Arc::clone(&stop);
            move || {
                let mut calls = 0;
                run_periodic_worker(
                    WorkerContext {
                        worker_id: "replay".to_string(),
                        interval: Duration::from_millis(10),
                        stop: Arc::clone(&stop),
                        events: tx,
                    },
                    || {
                        calls += 1;
                        if calls == 2 {
                            stop.store(true, Ordering::Relaxed);
                            Err("boom".to_string())
                        } else {
                            Ok(())
                        }
                    },
                )
            }
        });
        handle.join().expect("join worker");

        let events = rx.try_iter().collect::<Vec<_>>();
        assert!(matches!(events.first(), Some(WorkerEvent::Started { .. })));
        assert!(matches!(events[1], WorkerEvent::Heartbeat { .. }));
        assert!(
            matches!(&events[2], WorkerEvent::Error { message, fatal: false, .. } if message == "boom")
        );
        assert!(matches!(events.last(), Some(WorkerEvent::Stopped { .. })));
        assert_eq!(events.len(), 4);
    }
}
