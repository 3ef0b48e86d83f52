use switchyard::channels::{
    ChannelAdapter, ChannelError, ChannelManager, ChannelReply, PushAdapter, PUSH_CHANNEL_ID,
};
use switchyard::config::ChannelConfig;
use switchyard::queue::{outbound_queue_path, OutboundQueue};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::tempdir;

#[derive(Debug, Clone)]
struct RecordedRequest {
    path: String,
    auth_header: String,
    body: String,
}

struct MockPushServer {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockPushServer {
    fn start(statuses: Vec<u16>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let requests_for_thread = Arc::clone(&requests);

        let handle = thread::spawn(move || {
            for status in statuses {
                let (mut stream, _) = listener.accept().expect("accept");
                let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

                let mut request_line = String::new();
                reader
                    .read_line(&mut request_line)
                    .expect("read request line");
                let path = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();

                let mut auth_header = String::new();
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).expect("read header");
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                    let lower = line.to_ascii_lowercase();
                    if lower.starts_with("authorization:") {
                        auth_header = line
                            .split_once(':')
                            .map(|(_, v)| v.trim().to_string())
                            .unwrap_or_default();
                    }
                    if lower.starts_with("content-length:") {
                        content_length = line
                            .split_once(':')
                            .map(|(_, v)| v.trim().parse::<usize>().unwrap_or(0))
                            .unwrap_or(0);
                    }
                }

                let mut body = vec![0_u8; content_length];
                if content_length > 0 {
                    reader.read_exact(&mut body).expect("read body");
                }

                requests_for_thread
                    .lock()
                    .expect("lock requests")
                    .push(RecordedRequest {
                        path,
                        auth_header,
                        body: String::from_utf8_lossy(&body).to_string(),
                    });

                let reason = if status == 200 { "OK" } else { "Server Error" };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{{}}"
                );
                stream
                    .write_all(response.as_bytes())
                    .expect("write response");
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
            handle: Some(handle),
        }
    }

    fn finish(mut self) -> Vec<RecordedRequest> {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("join mock server");
        }
        self.requests.lock().expect("lock requests").clone()
    }
}

fn push_config(endpoint: &str, token: Option<&str>) -> ChannelConfig {
    let mut credentials = BTreeMap::from([("endpoint".to_string(), endpoint.to_string())]);
    if let Some(token) = token {
        credentials.insert("token".to_string(), token.to_string());
    }
    ChannelConfig {
        enabled: true,
        credentials,
        allowlist: Vec::new(),
    }
}

#[test]
fn push_send_posts_json_with_bearer_token() {
    let server = MockPushServer::start(vec![200]);
    let adapter = PushAdapter::new();
    adapter
        .start(&push_config(
            &format!("{}/hooks/agent", server.base_url),
            Some("secret-token"),
        ))
        .expect("start");

    adapter
        .send(&ChannelReply::new(PUSH_CHANNEL_ID, "ops-phone", "deploy done"))
        .expect("send");

    let requests = server.finish();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/hooks/agent");
    assert_eq!(requests[0].auth_header, "Bearer secret-token");
    let body: serde_json::Value = serde_json::from_str(&requests[0].body).expect("json body");
    assert_eq!(body["target"], "ops-phone");
    assert_eq!(body["text"], "deploy done");
    assert_eq!(body["channel"], "push");
}

#[test]
fn push_error_status_is_a_delivery_failure() {
    let server = MockPushServer::start(vec![500]);
    let adapter = PushAdapter::new();
    adapter
        .start(&push_config(&server.base_url, None))
        .expect("start");

    let err = adapter
        .send(&ChannelReply::new(PUSH_CHANNEL_ID, "ops", "hello"))
        .expect_err("500 fails");
    match err {
        ChannelError::Delivery { channel, reason } => {
            assert_eq!(channel, "push");
            assert!(reason.contains("500"), "reason: {reason}");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let requests = server.finish();
    assert_eq!(requests[0].auth_header, "");
}

#[test]
fn queued_push_reply_is_retried_by_replay() {
    let dir = tempdir().expect("tempdir");
    let server = MockPushServer::start(vec![503, 200]);
    let queue = Arc::new(OutboundQueue::open(outbound_queue_path(dir.path())));
    let configs = BTreeMap::from([(
        PUSH_CHANNEL_ID.to_string(),
        push_config(&server.base_url, Some("t")),
    )]);
    let manager = ChannelManager::new(
        [Arc::new(PushAdapter::new()) as Arc<dyn ChannelAdapter>],
        configs,
    )
    .with_queue(queue.clone());
    manager.start();

    manager
        .send(&ChannelReply::new(PUSH_CHANNEL_ID, "ops", "nightly report"))
        .expect_err("first attempt fails");
    assert_eq!(queue.pending().expect("pending").len(), 1);

    let report = manager.replay().expect("replay");
    assert_eq!(report.replayed, 1);
    assert_eq!(report.failed, 0);
    assert!(queue.pending().expect("pending").is_empty());

    let requests = server.finish();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body, requests[1].body);
}
