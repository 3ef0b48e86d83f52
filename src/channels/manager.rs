use super::policy::{guarded_handler, HandlerSlot};
use super::{ChannelAdapter, ChannelError, ChannelMessage, ChannelReply, ChannelStatus};
use crate::config::ChannelConfig;
use crate::queue::OutboundQueue;
use crate::shared::logging::RuntimeLog;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub replayed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Lifecycle {
    started: BTreeSet<String>,
    start_errors: BTreeMap<String, String>,
}

/// Routes inbound traffic from every adapter to one handler and outbound
/// replies to the matching adapter, optionally through a write-ahead queue.
pub struct ChannelManager {
    adapters: BTreeMap<String, Arc<dyn ChannelAdapter>>,
    configs: BTreeMap<String, ChannelConfig>,
    queue: Option<Arc<OutboundQueue>>,
    handler: HandlerSlot,
    lifecycle: Mutex<Lifecycle>,
    in_flight: Mutex<BTreeSet<String>>,
    log: RuntimeLog,
}

impl ChannelManager {
    pub fn new<I>(adapters: I, configs: BTreeMap<String, ChannelConfig>) -> Self
    where
        I: IntoIterator<Item = Arc<dyn ChannelAdapter>>,
    {
        let adapters = adapters
            .into_iter()
            .map(|adapter| (adapter.id().to_string(), adapter))
            .collect();
        Self {
            adapters,
            configs,
            queue: None,
            handler: Arc::new(Mutex::new(None)),
            lifecycle: Mutex::new(Lifecycle::default()),
            in_flight: Mutex::new(BTreeSet::new()),
            log: RuntimeLog::disabled(),
        }
    }

    pub fn with_queue(mut self, queue: Arc<OutboundQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_log(mut self, log: RuntimeLog) -> Self {
        self.log = log;
        self
    }

    pub fn queue(&self) -> Option<&Arc<OutboundQueue>> {
        self.queue.as_ref()
    }

    /// Replaces the single inbound handler.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(ChannelMessage) + Send + Sync + 'static,
    {
        *self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Starts every enabled channel that has an adapter. Failures are
    /// recorded per channel and never abort the others.
    pub fn start(&self) {
        for (channel, config) in &self.configs {
            if !config.enabled {
                continue;
            }
            let Some(adapter) = self.adapters.get(channel) else {
                continue;
            };
            adapter.set_message_handler(guarded_handler(
                channel,
                config,
                Arc::clone(&self.handler),
                self.log.clone(),
            ));
            let outcome = adapter.start(config);

            let mut lifecycle = self.lifecycle();
            match outcome {
                Ok(()) => {
                    lifecycle.started.insert(channel.clone());
                    lifecycle.start_errors.remove(channel);
                    self.log
                        .info("channel.started", &format!("channel={channel}"));
                }
                Err(err) => {
                    lifecycle.started.remove(channel);
                    lifecycle
                        .start_errors
                        .insert(channel.clone(), err.to_string());
                    self.log.error(
                        "channel.start_failed",
                        &format!("channel={channel} error={err}"),
                    );
                }
            }
        }
    }

    pub fn stop(&self) {
        let started = std::mem::take(&mut self.lifecycle().started);
        for channel in started {
            let Some(adapter) = self.adapters.get(&channel) else {
                continue;
            };
            match adapter.stop() {
                Ok(()) => self
                    .log
                    .info("channel.stopped", &format!("channel={channel}")),
                Err(err) => self.log.warn(
                    "channel.stopped",
                    &format!("channel={channel} stop_error={err}"),
                ),
            }
        }
    }

    /// With a queue the reply is persisted before the first attempt and only
    /// removed once the adapter accepts it.
    pub fn send(&self, reply: &ChannelReply) -> Result<(), ChannelError> {
        let adapter = self
            .adapters
            .get(&reply.channel)
            .ok_or_else(|| ChannelError::UnknownChannel(reply.channel.clone()))?;

        let Some(queue) = self.queue.as_ref() else {
            return adapter.send(reply);
        };

        let id = queue.enqueue(&reply.channel, &reply.chat_id, &reply.text)?;
        self.in_flight().insert(id.clone());
        let attempt = adapter.send(reply);
        self.in_flight().remove(&id);
        match attempt {
            Ok(()) => {
                queue.ack(&id)?;
                Ok(())
            }
            Err(err) => {
                self.log.warn(
                    "outbound.delivery_failed",
                    &format!("id={id} channel={} error={err}", reply.channel),
                );
                if let Err(queue_err) = queue.failed(&id, &err.to_string()) {
                    self.log.error(
                        "outbound.delivery_failed",
                        &format!("id={id} queue_error={queue_err}"),
                    );
                }
                Err(err)
            }
        }
    }

    /// Single attempt that never touches the queue. For messages that are
    /// meaningless once the first attempt fails.
    pub fn send_direct(&self, reply: &ChannelReply) -> Result<(), ChannelError> {
        self.adapters
            .get(&reply.channel)
            .ok_or_else(|| ChannelError::UnknownChannel(reply.channel.clone()))?
            .send(reply)
    }

    /// One delivery attempt for every pending record. Records whose first
    /// attempt through [`ChannelManager::send`] on this manager is still
    /// running are skipped. Another process sharing the queue file can still
    /// deliver such a record twice.
    pub fn replay(&self) -> Result<ReplayReport, ChannelError> {
        let mut report = ReplayReport::default();
        let Some(queue) = self.queue.as_ref() else {
            return Ok(report);
        };

        for record in queue.pending()? {
            if self.in_flight().contains(&record.id) {
                continue;
            }
            let reply = ChannelReply::new(&record.channel, &record.target, &record.content);
            let attempt = match self.adapters.get(&record.channel) {
                Some(adapter) => adapter.send(&reply),
                None => Err(ChannelError::UnknownChannel(record.channel.clone())),
            };
            match attempt {
                Ok(()) => {
                    queue.ack(&record.id)?;
                    report.replayed += 1;
                }
                Err(err) => {
                    self.log.warn(
                        "outbound.delivery_failed",
                        &format!("id={} channel={} error={err}", record.id, record.channel),
                    );
                    queue.failed(&record.id, &err.to_string())?;
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Status of every channel that is both configured and backed by an adapter.
    pub fn status(&self) -> BTreeMap<String, ChannelStatus> {
        let lifecycle = self.lifecycle();
        self.configs
            .iter()
            .filter(|(channel, _)| self.adapters.contains_key(*channel))
            .map(|(channel, config)| {
                let status = if lifecycle.start_errors.contains_key(channel) {
                    ChannelStatus::Error
                } else if !config.enabled {
                    ChannelStatus::Disabled
                } else if lifecycle.started.contains(channel) {
                    ChannelStatus::Connected
                } else {
                    ChannelStatus::Stopped
                };
                (channel.clone(), status)
            })
            .collect()
    }

    pub fn start_errors(&self) -> BTreeMap<String, String> {
        self.lifecycle().start_errors.clone()
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
