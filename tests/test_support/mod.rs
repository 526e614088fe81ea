#![allow(dead_code)]

use serde_json::json;
use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_eduwhisperd");
    let mut child = Command::new(exe)
        .env_remove("EDUWHISPER_API_URL")
        .env_remove("EDUWHISPER_API_TOKEN")
        .env("EDUWHISPER_LOG", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn eduwhisperd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

pub fn error_code(resp: &serde_json::Value) -> Option<&str> {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

pub fn activity(name: &str) -> serde_json::Value {
    json!({
        "studentName": name,
        "grade": "8",
        "subject": "Science",
        "type": "Task",
        "details": format!("Lab write-up for {}", name),
        "score": 7.5
    })
}

#[derive(Default)]
struct ApiState {
    available: bool,
    posts: usize,
    reject_posts: HashSet<usize>,
    refuse_status: Option<u16>,
    post_body: Option<serde_json::Value>,
    received: Vec<serde_json::Value>,
}

/// Minimal stand-in for the hosted activity API. Every POST is numbered from
/// zero, whether it is accepted or not.
#[derive(Clone)]
pub struct FakeActivityApi {
    pub base_url: String,
    state: Arc<Mutex<ApiState>>,
}

impl FakeActivityApi {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake api");
        let port = listener.local_addr().expect("addr").port();
        let state = Arc::new(Mutex::new(ApiState {
            available: true,
            ..Default::default()
        }));
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let shared = Arc::clone(&shared);
                thread::spawn(move || serve(stream, &shared));
            }
        });
        FakeActivityApi {
            base_url: format!("http://127.0.0.1:{}", port),
            state,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().unwrap().available = available;
    }

    pub fn reject_post(&self, index: usize) {
        self.state.lock().unwrap().reject_posts.insert(index);
    }

    /// Refuse every POST with `status` without storing it.
    pub fn refuse_posts(&self, status: u16) {
        self.state.lock().unwrap().refuse_status = Some(status);
    }

    /// Store POSTs but answer 201 with `body` instead of a record.
    pub fn answer_posts_with(&self, body: serde_json::Value) {
        self.state.lock().unwrap().post_body = Some(body);
    }

    pub fn post_count(&self) -> usize {
        self.state.lock().unwrap().posts
    }

    pub fn received_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .received
            .iter()
            .map(|v| v["studentName"].as_str().unwrap_or("").to_string())
            .collect()
    }

    pub fn received(&self) -> Vec<serde_json::Value> {
        self.state.lock().unwrap().received.clone()
    }
}

fn serve(stream: TcpStream, state: &Mutex<ApiState>) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).unwrap_or(0) == 0 {
            break;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    if content_length > 0 && reader.read_exact(&mut body).is_err() {
        return;
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");
    let (status, payload) = route(state, method, path, &body);

    let text = payload.to_string();
    let reason = match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Service Unavailable",
    };
    let mut out = stream;
    let _ = write!(
        out,
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        text.len(),
        text
    );
    let _ = out.flush();
}

fn route(
    state: &Mutex<ApiState>,
    method: &str,
    path: &str,
    body: &[u8],
) -> (u16, serde_json::Value) {
    let mut st = state.lock().unwrap();
    if !st.available {
        return (503, json!({ "error": "maintenance" }));
    }
    let path = path.split('?').next().unwrap_or("");
    match (method, path) {
        ("POST", "/api/activities") => {
            let index = st.posts;
            st.posts += 1;
            if let Some(status) = st.refuse_status {
                return (status, json!({ "error": "invalid activity" }));
            }
            if st.reject_posts.contains(&index) {
                return (500, json!({ "error": "write failed" }));
            }
            let v: serde_json::Value = serde_json::from_slice(body).unwrap_or_default();
            st.received.push(v.clone());
            match &st.post_body {
                Some(b) => (201, b.clone()),
                None => (201, record_from(&v, index)),
            }
        }
        ("GET", "/api/activities") => {
            let rows: Vec<_> = st
                .received
                .iter()
                .enumerate()
                .rev()
                .map(|(i, v)| record_from(v, i))
                .collect();
            (200, serde_json::Value::Array(rows))
        }
        _ => (404, json!({ "error": "not found" })),
    }
}

fn record_from(v: &serde_json::Value, index: usize) -> serde_json::Value {
    json!({
        "id": format!("remote-{}", index),
        "studentName": v["studentName"],
        "grade": v["grade"],
        "subject": v["subject"],
        "type": v["type"],
        "details": v["details"],
        "timestamp": v["submittedAt"],
    })
}
