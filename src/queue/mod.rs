//! Durable store of outbound deliveries awaiting confirmation.

pub mod outbound;
pub mod paths;

pub use outbound::{
    FailureDisposition, OutboundMessage, OutboundQueue, DEFAULT_MAX_ATTEMPTS,
};
pub use paths::{outbound_queue_path, OUTBOUND_QUEUE_FILE_NAME};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid queue payload in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode queue payload for {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to generate outbound message id: {0}")]
    IdGeneration(String),
}
