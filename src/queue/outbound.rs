use super::QueueError;
use crate::shared::fs_atomic::atomic_write_file;
use crate::shared::ids::generate_id;
use crate::shared::time::now_millis;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub id: String,
    pub channel: String,
    pub target: String,
    pub content: String,
    pub created_at: i64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    Retained { attempts: u32 },
    Dropped { attempts: u32 },
    Unknown,
}

/// Write-ahead log of outbound deliveries. Every mutation re-reads the file,
/// applies the change and rewrites the whole pending set as one JSON array.
/// Nothing is cached between calls, so records written by another instance
/// on the same file are never overwritten by a stale copy.
#[derive(Debug)]
pub struct OutboundQueue {
    path: PathBuf,
    max_attempts: u32,
    write_lock: Mutex<()>,
}

impl OutboundQueue {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_max_attempts(path, DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(path: impl Into<PathBuf>, max_attempts: u32) -> Self {
        Self {
            path: path.into(),
            max_attempts: max_attempts.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Persists a new record before returning its id; callers attempt delivery
    /// only after this succeeds.
    pub fn enqueue(&self, channel: &str, target: &str, content: &str) -> Result<String, QueueError> {
        let created_at = now_millis();
        let id = generate_id("out", created_at)
            .map_err(|err| QueueError::IdGeneration(err.to_string()))?;
        let record = OutboundMessage {
            id: id.clone(),
            channel: channel.to_string(),
            target: target.to_string(),
            content: content.to_string(),
            created_at,
            attempts: 0,
            last_error: None,
        };
        self.mutate(|entries| {
            entries.push(record);
            Some(())
        })?;
        Ok(id)
    }

    pub fn ack(&self, id: &str) -> Result<bool, QueueError> {
        let removed = self.mutate(|entries| {
            let index = entries.iter().position(|entry| entry.id == id)?;
            entries.remove(index);
            Some(())
        })?;
        Ok(removed.is_some())
    }

    pub fn failed(&self, id: &str, error: &str) -> Result<FailureDisposition, QueueError> {
        let max_attempts = self.max_attempts;
        let outcome = self.mutate(|entries| {
            let index = entries.iter().position(|entry| entry.id == id)?;
            let entry = &mut entries[index];
            entry.attempts = entry.attempts.saturating_add(1);
            entry.last_error = Some(error.to_string());
            let attempts = entry.attempts;
            if attempts >= max_attempts {
                entries.remove(index);
                Some(FailureDisposition::Dropped { attempts })
            } else {
                Some(FailureDisposition::Retained { attempts })
            }
        })?;
        Ok(outcome.unwrap_or(FailureDisposition::Unknown))
    }

    pub fn pending(&self) -> Result<Vec<OutboundMessage>, QueueError> {
        let _guard = self.lock();
        read_entries(&self.path)
    }

    /// Applies `apply` to what is on disk right now and persists the result.
    /// `None` from `apply` means nothing changed and no write happens.
    fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut Vec<OutboundMessage>) -> Option<T>,
    ) -> Result<Option<T>, QueueError> {
        let _guard = self.lock();
        let mut entries = read_entries(&self.path)?;
        let Some(result) = apply(&mut entries) else {
            return Ok(None);
        };
        write_entries(&self.path, &entries)?;
        Ok(Some(result))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_entries(path: &Path) -> Result<Vec<OutboundMessage>, QueueError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(QueueError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw).map_err(|source| QueueError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn write_entries(path: &Path, entries: &[OutboundMessage]) -> Result<(), QueueError> {
    let encoded = serde_json::to_vec_pretty(entries).map_err(|source| QueueError::Encode {
        path: path.display().to_string(),
        source,
    })?;
    atomic_write_file(path, &encoded).map_err(|source| QueueError::Io {
        path: path.display().to_string(),
        source,
    })
}
