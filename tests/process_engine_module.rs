use serde_json::Value;
use switchyard::engine::{
    AgentEngine, EngineError, EngineEvent, EngineRequest, ProcessEngine, ToolApprover,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("write script");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

fn request(workspace: &Path, resume: Option<&str>) -> EngineRequest {
    EngineRequest {
        prompt: "summarize the repo".to_string(),
        resume_session: resume.map(str::to_string),
        workspace: workspace.to_path_buf(),
        model: "sonnet".to_string(),
        max_turns: 4,
        approver: None,
    }
}

fn collect(
    engine: &ProcessEngine,
    request: &EngineRequest,
) -> (Vec<EngineEvent>, Result<(), EngineError>) {
    let mut events = Vec::new();
    let outcome = engine.run(request, &mut |event| events.push(event));
    (events, outcome)
}

const TOOL_STREAM: &str = r#"#!/bin/sh
cat <<'JSON'
{"type":"system","subtype":"init","session_id":"sess-42"}
{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Bash","input":{"command":"ls"}}]}}
JSON
sleep 0.2
cat <<'JSON'
{"type":"user","message":{"content":[{"type":"tool_result","content":"ok"}]}}
{"type":"assistant","message":{"content":[{"type":"text","text":"All good."}]}}
{"type":"result","subtype":"success","session_id":"sess-42","total_cost_usd":0.02,"num_turns":2,"result":"All good."}
JSON
"#;

struct ScriptedApprover {
    allow: bool,
    seen: Mutex<Vec<(String, Value)>>,
}

impl ToolApprover for ScriptedApprover {
    fn approve(&self, tool_name: &str, args: &Value) -> bool {
        self.seen
            .lock()
            .expect("seen")
            .push((tool_name.to_string(), args.clone()));
        self.allow
    }
}

#[test]
fn stream_lines_become_events_in_order() {
    let dir = tempdir().expect("tempdir");
    let bin = dir.path().join("fake-agent");
    write_script(&bin, TOOL_STREAM);
    let engine = ProcessEngine::new(bin.display().to_string());

    let (events, outcome) = collect(&engine, &request(dir.path(), None));
    outcome.expect("run succeeds");
    let kinds = events
        .iter()
        .map(|event| match event {
            EngineEvent::Init { .. } => "init",
            EngineEvent::Text { .. } => "text",
            EngineEvent::ToolStart { .. } => "tool_start",
            EngineEvent::ToolEnd => "tool_end",
            EngineEvent::Result(_) => "result",
        })
        .collect::<Vec<_>>();
    assert_eq!(kinds, vec!["init", "tool_start", "tool_end", "text", "result"]);

    let Some(EngineEvent::Result(result)) = events.last() else {
        panic!("missing result event");
    };
    assert_eq!(result.session_id, "sess-42");
    assert_eq!(result.turns, 2);
    assert_eq!(result.result.as_deref(), Some("All good."));
}

#[test]
fn arguments_carry_prompt_model_and_resume_session() {
    let dir = tempdir().expect("tempdir");
    let bin = dir.path().join("fake-agent");
    let args_file = dir.path().join("args.txt");
    write_script(
        &bin,
        &format!(
            "#!/bin/sh\nfor arg in \"$@\"; do echo \"$arg\"; done > {}\npwd -P >> {}\n",
            args_file.display(),
            args_file.display()
        ),
    );
    let engine = ProcessEngine::new(bin.display().to_string());

    let (_, outcome) = collect(&engine, &request(dir.path(), Some("sess-7")));
    outcome.expect("run succeeds");
    let recorded = fs::read_to_string(&args_file).expect("args file");
    let lines = recorded.lines().collect::<Vec<_>>();
    assert_eq!(
        &lines[..11],
        [
            "-p",
            "summarize the repo",
            "--output-format",
            "stream-json",
            "--verbose",
            "--model",
            "sonnet",
            "--max-turns",
            "4",
            "--resume",
            "sess-7"
        ]
    );
    let workspace = fs::canonicalize(dir.path()).expect("canonical workspace");
    assert_eq!(Path::new(lines[11]), workspace.as_path());
}

#[test]
fn non_zero_exit_reports_code_and_stderr() {
    let dir = tempdir().expect("tempdir");
    let bin = dir.path().join("fake-agent");
    write_script(&bin, "#!/bin/sh\necho 'rate limited' >&2\nexit 3\n");
    let engine = ProcessEngine::new(bin.display().to_string());

    let (_, outcome) = collect(&engine, &request(dir.path(), None));
    match outcome {
        Err(EngineError::NonZeroExit { exit_code, stderr }) => {
            assert_eq!(exit_code, 3);
            assert_eq!(stderr, "rate limited");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn missing_binary_is_reported_by_name() {
    let dir = tempdir().expect("tempdir");
    let missing = dir.path().join("no-such-agent").display().to_string();
    let engine = ProcessEngine::new(missing.clone());

    let (events, outcome) = collect(&engine, &request(dir.path(), None));
    assert!(events.is_empty());
    assert!(matches!(
        outcome,
        Err(EngineError::MissingBinary { binary }) if binary == missing
    ));
}

#[test]
fn runaway_process_is_killed_at_the_timeout() {
    let dir = tempdir().expect("tempdir");
    let bin = dir.path().join("fake-agent");
    write_script(
        &bin,
        "#!/bin/sh\necho '{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s\"}'\nexec sleep 10\n",
    );
    let engine =
        ProcessEngine::new(bin.display().to_string()).with_timeout(Duration::from_millis(300));

    let started = Instant::now();
    let (events, outcome) = collect(&engine, &request(dir.path(), None));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(events.len(), 1);
    assert!(matches!(
        outcome,
        Err(EngineError::Timeout { timeout_ms: 300 })
    ));
}

#[test]
fn denied_gated_tool_stops_the_run() {
    let dir = tempdir().expect("tempdir");
    let bin = dir.path().join("fake-agent");
    write_script(&bin, TOOL_STREAM);
    let approver = Arc::new(ScriptedApprover {
        allow: false,
        seen: Mutex::new(Vec::new()),
    });
    let engine = ProcessEngine::new(bin.display().to_string()).with_gated_tools(["Bash"]);
    let mut request = request(dir.path(), None);
    request.approver = Some(approver.clone());

    let (events, outcome) = collect(&engine, &request);
    assert!(matches!(
        outcome,
        Err(EngineError::ToolDenied { ref tool }) if tool == "Bash"
    ));
    assert_eq!(
        approver.seen.lock().expect("seen").clone(),
        vec![("Bash".to_string(), serde_json::json!({"command": "ls"}))]
    );
    assert!(events
        .iter()
        .any(|event| matches!(event, EngineEvent::Text { text } if text.contains("blocked"))));
    let Some(EngineEvent::Result(result)) = events.last() else {
        panic!("missing closing result");
    };
    assert_eq!(result.session_id, "sess-42");
    assert_eq!(result.errors.len(), 1);
}

#[test]
fn approved_or_ungated_tools_run_to_completion() {
    let dir = tempdir().expect("tempdir");
    let bin = dir.path().join("fake-agent");
    write_script(&bin, TOOL_STREAM);

    let approver = Arc::new(ScriptedApprover {
        allow: true,
        seen: Mutex::new(Vec::new()),
    });
    let gated = ProcessEngine::new(bin.display().to_string()).with_gated_tools(["Bash"]);
    let mut approved = request(dir.path(), None);
    approved.approver = Some(approver.clone());
    let (_, outcome) = collect(&gated, &approved);
    outcome.expect("approved run");
    assert_eq!(approver.seen.lock().expect("seen").len(), 1);

    let refusing = Arc::new(ScriptedApprover {
        allow: false,
        seen: Mutex::new(Vec::new()),
    });
    let ungated = ProcessEngine::new(bin.display().to_string()).with_gated_tools(["Write"]);
    let mut untouched = request(dir.path(), None);
    untouched.approver = Some(refusing.clone());
    let (_, outcome) = collect(&ungated, &untouched);
    outcome.expect("ungated run");
    assert!(refusing.seen.lock().expect("seen").is_empty());
}
