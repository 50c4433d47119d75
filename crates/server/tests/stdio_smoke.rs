#![forbid(unsafe_code)]

use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

struct StdioClient {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    storage_dir: PathBuf,
}

impl StdioClient {
    fn start(test_name: &str) -> Self {
        let storage_dir = temp_dir(test_name);
        std::fs::create_dir_all(&storage_dir).expect("create storage dir");

        let mut child = Command::new(env!("CARGO_BIN_EXE_tl_server"))
            .arg("--storage-dir")
            .arg(&storage_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("spawn tl_server");

        let stdin = child.stdin.take().expect("stdin");
        let stdout = BufReader::new(child.stdout.take().expect("stdout"));

        Self {
            child,
            stdin,
            stdout,
            storage_dir,
        }
    }

    fn send(&mut self, req: Value) {
        let body = serde_json::to_vec(&req).expect("serialize request");
        write!(self.stdin, "Content-Length: {}\r\n\r\n", body.len()).expect("write header");
        self.stdin.write_all(&body).expect("write body");
        self.stdin.flush().expect("flush request");
    }

    fn recv(&mut self) -> Value {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let read = self.stdout.read_line(&mut line).expect("read header line");
            assert!(read > 0, "unexpected EOF reading response headers");
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                break;
            }
            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("content-length")
            {
                content_length = Some(value.trim().parse::<usize>().expect("content-length"));
            }
        }

        let len = content_length.expect("missing Content-Length in response");
        let mut buf = vec![0u8; len];
        self.stdout
            .read_exact(&mut buf)
            .expect("read response body");
        serde_json::from_slice(&buf).expect("parse response json")
    }

    fn request(&mut self, req: Value) -> Value {
        self.send(req);
        self.recv()
    }
}

impl Drop for StdioClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.storage_dir);
    }
}

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    base.join(format!("tl_server_{test_name}_{pid}_{nonce}"))
}

fn error_code(resp: &Value) -> Option<i64> {
    resp.get("error").and_then(|e| e.get("code")).and_then(Value::as_i64)
}

fn error_message(resp: &Value) -> Option<&str> {
    resp.get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
}

#[test]
fn hello_ping_and_unknown_methods() {
    let mut client = StdioClient::start("hello_ping");

    let hello = client.request(json!({ "jsonrpc": "2.0", "id": 1, "method": "hello" }));
    let result = hello.get("result").expect("hello result");
    assert_eq!(
        result.get("name").and_then(Value::as_str),
        Some("tasklist-server")
    );
    assert_eq!(
        result.get("protocol").and_then(Value::as_str),
        Some("tasklist/1")
    );

    let pong = client.request(json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" }));
    assert_eq!(pong.get("id").and_then(Value::as_i64), Some(2));
    assert!(pong.get("result").is_some());

    let unknown = client.request(json!({ "jsonrpc": "2.0", "id": 3, "method": "flushQueue" }));
    assert_eq!(error_code(&unknown), Some(-32601));

    // A notification for an unknown method gets no answer at all; the next
    // frame on the wire must belong to the ping that follows it.
    client.send(json!({ "jsonrpc": "2.0", "method": "flushQueue" }));
    let pong = client.request(json!({ "jsonrpc": "2.0", "id": 4, "method": "ping" }));
    assert_eq!(pong.get("id").and_then(Value::as_i64), Some(4));
}

#[test]
fn add_task_requires_auth() {
    let mut client = StdioClient::start("add_requires_auth");

    let denied = client.request(json!({
        "jsonrpc": "2.0", "id": 1, "method": "addTask", "params": ["buy milk"]
    }));
    assert_eq!(error_code(&denied), Some(-32001));
    assert_eq!(error_message(&denied), Some("not-authorized"));

    let registered = client.request(json!({
        "jsonrpc": "2.0", "id": 2, "method": "register", "params": ["alice", "hunter2"]
    }));
    let result = registered.get("result").expect("register result");
    assert_eq!(
        result.get("username").and_then(Value::as_str),
        Some("alice")
    );
    assert!(
        result
            .get("session_token")
            .and_then(Value::as_str)
            .is_some_and(|token| !token.is_empty())
    );

    let added = client.request(json!({
        "jsonrpc": "2.0", "id": 3, "method": "addTask", "params": ["buy milk"]
    }));
    let task = added
        .get("result")
        .and_then(|r| r.get("task"))
        .expect("result.task");
    assert_eq!(task.get("id").and_then(Value::as_str), Some("TASK-000001"));
    assert_eq!(task.get("checked").and_then(Value::as_bool), Some(false));
    assert_eq!(task.get("username").and_then(Value::as_str), Some("alice"));

    let whoami = client.request(json!({ "jsonrpc": "2.0", "id": 4, "method": "whoami" }));
    assert_eq!(
        whoami
            .get("result")
            .and_then(|r| r.get("authenticated"))
            .and_then(Value::as_bool),
        Some(true)
    );
}

#[test]
fn missing_ids_are_noops() {
    let mut client = StdioClient::start("missing_ids_are_noops");

    client.request(json!({
        "jsonrpc": "2.0", "id": 1, "method": "register", "params": ["alice", "hunter2"]
    }));
    let added = client.request(json!({
        "jsonrpc": "2.0", "id": 2, "method": "addTask", "params": ["water plants"]
    }));
    let task_id = added
        .get("result")
        .and_then(|r| r.get("task"))
        .and_then(|t| t.get("id"))
        .and_then(Value::as_str)
        .expect("task id")
        .to_string();

    let checked = client.request(json!({
        "jsonrpc": "2.0", "id": 3, "method": "completeTask", "params": [task_id, true]
    }));
    assert_eq!(
        checked
            .get("result")
            .and_then(|r| r.get("updated"))
            .and_then(Value::as_i64),
        Some(1)
    );

    let removed = client.request(json!({
        "jsonrpc": "2.0", "id": 4, "method": "deleteTask", "params": [task_id]
    }));
    assert_eq!(
        removed
            .get("result")
            .and_then(|r| r.get("removed"))
            .and_then(Value::as_i64),
        Some(1)
    );

    // Deleting or checking an id that no longer exists answers with a zero
    // count, not an error.
    let removed = client.request(json!({
        "jsonrpc": "2.0", "id": 5, "method": "deleteTask", "params": [task_id]
    }));
    assert_eq!(
        removed
            .get("result")
            .and_then(|r| r.get("removed"))
            .and_then(Value::as_i64),
        Some(0)
    );
    let checked = client.request(json!({
        "jsonrpc": "2.0", "id": 6, "method": "completeTask", "params": ["TASK-999999", true]
    }));
    assert_eq!(
        checked
            .get("result")
            .and_then(|r| r.get("updated"))
            .and_then(Value::as_i64),
        Some(0)
    );
}

#[test]
fn invalid_params_are_rejected() {
    let mut client = StdioClient::start("invalid_params");

    client.request(json!({
        "jsonrpc": "2.0", "id": 1, "method": "register", "params": ["alice", "hunter2"]
    }));

    let empty_text = client.request(json!({
        "jsonrpc": "2.0", "id": 2, "method": "addTask", "params": ["   "]
    }));
    assert_eq!(error_code(&empty_text), Some(-32602));

    let non_bool = client.request(json!({
        "jsonrpc": "2.0", "id": 3, "method": "completeTask", "params": ["TASK-000001", "yes"]
    }));
    assert_eq!(error_code(&non_bool), Some(-32602));

    let not_an_array = client.request(json!({
        "jsonrpc": "2.0", "id": 4, "method": "addTask", "params": { "text": "nope" }
    }));
    assert_eq!(error_code(&not_an_array), Some(-32602));

    let bad_username = client.request(json!({
        "jsonrpc": "2.0", "id": 5, "method": "register", "params": ["-dash", "pw"]
    }));
    assert_eq!(error_code(&bad_username), Some(-32602));
}

#[test]
fn subscribe_streams_own_deltas() {
    let mut client = StdioClient::start("subscribe_streams");

    client.request(json!({
        "jsonrpc": "2.0", "id": 1, "method": "register", "params": ["alice", "hunter2"]
    }));

    let subscribed = client.request(json!({ "jsonrpc": "2.0", "id": 2, "method": "subscribe" }));
    let result = subscribed.get("result").expect("subscribe result");
    assert_eq!(
        result.get("subscribed").and_then(Value::as_bool),
        Some(true)
    );
    assert_eq!(
        result
            .get("tasks")
            .and_then(Value::as_array)
            .map(Vec::len),
        Some(0)
    );
    assert_eq!(
        result.get("incompleteCount").and_then(Value::as_i64),
        Some(0)
    );

    // A mutation on a subscribed connection answers first, then pushes the
    // delta as a separate notification frame.
    let added = client.request(json!({
        "jsonrpc": "2.0", "id": 3, "method": "addTask", "params": ["pay rent"]
    }));
    let task_id = added
        .get("result")
        .and_then(|r| r.get("task"))
        .and_then(|t| t.get("id"))
        .and_then(Value::as_str)
        .expect("task id")
        .to_string();

    let delta = client.recv();
    assert_eq!(
        delta.get("method").and_then(Value::as_str),
        Some("tasks/delta")
    );
    let params = delta.get("params").expect("delta params");
    assert_eq!(params.get("kind").and_then(Value::as_str), Some("added"));
    assert_eq!(
        params.get("taskId").and_then(Value::as_str),
        Some(task_id.as_str())
    );
    assert_eq!(
        params
            .get("task")
            .and_then(|t| t.get("text"))
            .and_then(Value::as_str),
        Some("pay rent")
    );

    let checked = client.request(json!({
        "jsonrpc": "2.0", "id": 4, "method": "completeTask", "params": [task_id, true]
    }));
    assert!(checked.get("result").is_some());
    let delta = client.recv();
    let params = delta.get("params").expect("delta params");
    assert_eq!(params.get("kind").and_then(Value::as_str), Some("changed"));
    assert_eq!(params.get("checked").and_then(Value::as_bool), Some(true));

    // Re-checking with the same value matches but emits no delta; the next
    // frame after deleteTask's answer must be the removal.
    let rechecked = client.request(json!({
        "jsonrpc": "2.0", "id": 5, "method": "completeTask", "params": [task_id, true]
    }));
    assert_eq!(
        rechecked
            .get("result")
            .and_then(|r| r.get("updated"))
            .and_then(Value::as_i64),
        Some(1)
    );

    let removed = client.request(json!({
        "jsonrpc": "2.0", "id": 6, "method": "deleteTask", "params": [task_id]
    }));
    assert!(removed.get("result").is_some());
    let delta = client.recv();
    let params = delta.get("params").expect("delta params");
    assert_eq!(params.get("kind").and_then(Value::as_str), Some("removed"));
    assert_eq!(
        params.get("taskId").and_then(Value::as_str),
        Some(task_id.as_str())
    );

    // The snapshot after all of this is empty again.
    let resub = client.request(json!({ "jsonrpc": "2.0", "id": 7, "method": "subscribe" }));
    assert_eq!(
        resub
            .get("result")
            .and_then(|r| r.get("tasks"))
            .and_then(Value::as_array)
            .map(Vec::len),
        Some(0)
    );
}

#[test]
fn anonymous_subscription_stays_empty() {
    let mut client = StdioClient::start("anonymous_subscription");

    let subscribed = client.request(json!({ "jsonrpc": "2.0", "id": 1, "method": "subscribe" }));
    let result = subscribed.get("result").expect("subscribe result");
    assert_eq!(
        result.get("subscribed").and_then(Value::as_bool),
        Some(false)
    );
    assert_eq!(
        result
            .get("tasks")
            .and_then(Value::as_array)
            .map(Vec::len),
        Some(0)
    );
    assert_eq!(
        result.get("incompleteCount").and_then(Value::as_i64),
        Some(0)
    );

    // Signing up while the anonymous feed is live: mutations answer normally
    // and the feed stays silent until a fresh subscribe.
    client.request(json!({
        "jsonrpc": "2.0", "id": 2, "method": "register", "params": ["bob", "pw"]
    }));
    client.request(json!({
        "jsonrpc": "2.0", "id": 3, "method": "addTask", "params": ["bob's errand"]
    }));
    let pong = client.request(json!({ "jsonrpc": "2.0", "id": 4, "method": "ping" }));
    assert_eq!(pong.get("id").and_then(Value::as_i64), Some(4));

    let resub = client.request(json!({ "jsonrpc": "2.0", "id": 5, "method": "subscribe" }));
    let result = resub.get("result").expect("subscribe result");
    assert_eq!(
        result.get("subscribed").and_then(Value::as_bool),
        Some(true)
    );
    assert_eq!(
        result
            .get("tasks")
            .and_then(Value::as_array)
            .map(Vec::len),
        Some(1)
    );
    // One unchecked task in the snapshot shows up in the count.
    assert_eq!(
        result.get("incompleteCount").and_then(Value::as_i64),
        Some(1)
    );
}

#[test]
fn sessions_round_trip() {
    let mut client = StdioClient::start("sessions_round_trip");

    let registered = client.request(json!({
        "jsonrpc": "2.0", "id": 1, "method": "register", "params": ["carol", "s3cret"]
    }));
    let token = registered
        .get("result")
        .and_then(|r| r.get("session_token"))
        .and_then(Value::as_str)
        .expect("session token")
        .to_string();

    client.request(json!({ "jsonrpc": "2.0", "id": 2, "method": "logout" }));
    let whoami = client.request(json!({ "jsonrpc": "2.0", "id": 3, "method": "whoami" }));
    assert_eq!(
        whoami
            .get("result")
            .and_then(|r| r.get("authenticated"))
            .and_then(Value::as_bool),
        Some(false)
    );

    // After logout the connection subscribes like any anonymous caller.
    let subscribed = client.request(json!({ "jsonrpc": "2.0", "id": 10, "method": "subscribe" }));
    let result = subscribed.get("result").expect("subscribe result");
    assert_eq!(
        result.get("subscribed").and_then(Value::as_bool),
        Some(false)
    );
    assert_eq!(
        result
            .get("tasks")
            .and_then(Value::as_array)
            .map(Vec::len),
        Some(0)
    );

    // The logout revoked the token; resuming it is an invalid session.
    let resumed = client.request(json!({
        "jsonrpc": "2.0", "id": 4, "method": "resume", "params": [token]
    }));
    assert_eq!(error_code(&resumed), Some(-32003));

    let denied = client.request(json!({
        "jsonrpc": "2.0", "id": 5, "method": "login", "params": ["carol", "wrong"]
    }));
    assert_eq!(error_code(&denied), Some(-32002));
    let unknown_user = client.request(json!({
        "jsonrpc": "2.0", "id": 6, "method": "login", "params": ["mallory", "s3cret"]
    }));
    assert_eq!(error_code(&unknown_user), Some(-32002));

    let login = client.request(json!({
        "jsonrpc": "2.0", "id": 7, "method": "login", "params": ["carol", "s3cret"]
    }));
    let fresh_token = login
        .get("result")
        .and_then(|r| r.get("session_token"))
        .and_then(Value::as_str)
        .expect("fresh session token")
        .to_string();
    assert_ne!(fresh_token, token);

    let resumed = client.request(json!({
        "jsonrpc": "2.0", "id": 8, "method": "resume", "params": [fresh_token]
    }));
    assert_eq!(
        resumed
            .get("result")
            .and_then(|r| r.get("username"))
            .and_then(Value::as_str),
        Some("carol")
    );

    let taken = client.request(json!({
        "jsonrpc": "2.0", "id": 9, "method": "register", "params": ["carol", "other"]
    }));
    assert_eq!(error_code(&taken), Some(-32602));
    assert_eq!(error_message(&taken), Some("username already taken"));
}

#[test]
fn newline_json_framing_works() {
    let storage_dir = temp_dir("newline_framing");
    std::fs::create_dir_all(&storage_dir).expect("create storage dir");

    let mut child = Command::new(env!("CARGO_BIN_EXE_tl_server"))
        .arg("--storage-dir")
        .arg(&storage_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn tl_server");

    let mut stdin = child.stdin.take().expect("stdin");
    let mut stdout = BufReader::new(child.stdout.take().expect("stdout"));

    writeln!(stdin, r#"{{"jsonrpc":"2.0","id":1,"method":"ping"}}"#).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    stdout.read_line(&mut line).expect("read response line");
    let resp: Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(resp.get("id").and_then(Value::as_i64), Some(1));
    assert!(resp.get("result").is_some());

    writeln!(stdin, "not json at all").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let mut line = String::new();
    stdout.read_line(&mut line).expect("read error line");
    let resp: Value = serde_json::from_str(line.trim()).expect("parse error response");
    assert_eq!(error_code(&resp), Some(-32700));

    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(&storage_dir);
}
