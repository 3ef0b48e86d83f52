use switchyard::queue::{
    outbound_queue_path, FailureDisposition, OutboundQueue, DEFAULT_MAX_ATTEMPTS,
};
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

#[test]
fn enqueued_record_survives_a_fresh_instance_unchanged() {
    let dir = tempdir().expect("tempdir");
    let path = outbound_queue_path(dir.path());
    let queue = OutboundQueue::open(&path);
    let id = queue
        .enqueue("telegram", "chat-9", "build finished")
        .expect("enqueue");
    let before = queue.pending().expect("pending");

    let reopened = OutboundQueue::open(&path);
    let after = reopened.pending().expect("pending after reopen");
    assert_eq!(after, before);
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, id);
    assert_eq!(after[0].attempts, 0);
    assert!(after[0].last_error.is_none());
    assert_eq!(reopened.max_attempts(), DEFAULT_MAX_ATTEMPTS);
}

#[test]
fn ack_removes_exactly_the_acknowledged_record() {
    let dir = tempdir().expect("tempdir");
    let queue = OutboundQueue::open(outbound_queue_path(dir.path()));
    let first = queue.enqueue("telegram", "a", "one").expect("first");
    let second = queue.enqueue("telegram", "b", "two").expect("second");
    let third = queue.enqueue("discord", "c", "three").expect("third");

    assert!(queue.ack(&second).expect("ack"));
    assert!(!queue.ack(&second).expect("second ack is a no-op"));
    assert!(!queue.ack("out-missing").expect("unknown ack"));

    let ids = queue
        .pending()
        .expect("pending")
        .into_iter()
        .map(|record| record.id)
        .collect::<Vec<_>>();
    assert_eq!(ids, vec![first, third]);
}

#[test]
fn failed_counts_each_attempt_and_drops_at_the_limit() {
    let dir = tempdir().expect("tempdir");
    let queue = OutboundQueue::with_max_attempts(outbound_queue_path(dir.path()), 2);
    let id = queue.enqueue("push", "ops", "alert").expect("enqueue");

    assert_eq!(
        queue.failed(&id, "timeout").expect("first failure"),
        FailureDisposition::Retained { attempts: 1 }
    );
    let pending = queue.pending().expect("pending");
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(pending[0].last_error.as_deref(), Some("timeout"));

    assert_eq!(
        queue.failed(&id, "refused").expect("second failure"),
        FailureDisposition::Dropped { attempts: 2 }
    );
    assert!(queue.pending().expect("pending").is_empty());
    assert_eq!(
        queue.failed(&id, "late").expect("unknown id"),
        FailureDisposition::Unknown
    );
}

#[test]
fn persisted_document_is_a_camel_case_json_array() {
    let dir = tempdir().expect("tempdir");
    let path = outbound_queue_path(dir.path());
    let queue = OutboundQueue::open(&path);
    let id = queue.enqueue("push", "ops", "hello").expect("enqueue");
    queue.failed(&id, "503").expect("failed");

    let raw = fs::read_to_string(&path).expect("read queue file");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
    let entries = value.as_array().expect("array");
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry["id"], id.as_str());
    assert_eq!(entry["target"], "ops");
    assert_eq!(entry["attempts"], 1);
    assert_eq!(entry["lastError"], "503");
    assert!(entry["createdAt"].as_i64().expect("createdAt") > 0);
}

#[test]
fn concurrent_enqueues_are_all_persisted() {
    let dir = tempdir().expect("tempdir");
    let path = outbound_queue_path(dir.path());
    let queue = Arc::new(OutboundQueue::open(&path));

    let handles = (0..8)
        .map(|n| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                queue
                    .enqueue("telegram", &format!("chat-{n}"), "hi")
                    .expect("enqueue")
            })
        })
        .collect::<Vec<_>>();
    let mut ids = handles
        .into_iter()
        .map(|handle| handle.join().expect("join"))
        .collect::<Vec<_>>();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);

    let reopened = OutboundQueue::open(&path);
    assert_eq!(reopened.pending().expect("pending").len(), 8);
}
