use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// One request as seen by the mock daemon.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub body: Value,
    pub authorization: Option<String>,
}

#[derive(Clone)]
enum Reply {
    Json(u16, Value),
    Bytes(u16, Vec<u8>),
}

#[derive(Default)]
struct MockState {
    /// Replies per route, consumed front to back; the last one repeats.
    routes: HashMap<String, VecDeque<Reply>>,
    requests: Vec<Recorded>,
}

impl MockState {
    fn next_reply(&mut self, key: &str) -> Option<Reply> {
        let queue = self.routes.get_mut(key)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

type Shared = Arc<Mutex<MockState>>;

/// Canned-response agentlabd stand-in. Routes are keyed by method and path;
/// anything unregistered answers 404 with a JSON error body. A route may
/// carry a sequence of replies to model a sandbox changing state between
/// polls.
pub struct MockDaemon {
    pub endpoint: String,
    state: Shared,
    server: JoinHandle<()>,
}

impl MockDaemon {
    pub async fn start() -> Self {
        crate::test_log!("FIXTURE: starting mock daemon on tcp");
        let state = Shared::default();
        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock daemon");
        let addr = listener.local_addr().expect("Failed to read local addr");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            endpoint: format!("http://{addr}"),
            state,
            server,
        }
    }

    #[cfg(unix)]
    pub async fn start_unix(socket: &Path) -> Self {
        crate::test_log!("FIXTURE: starting mock daemon on {}", socket.display());
        let state = Shared::default();
        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener =
            tokio::net::UnixListener::bind(socket).expect("Failed to bind mock daemon socket");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            endpoint: String::new(),
            state,
            server,
        }
    }

    fn set_route(&self, method: Method, path: &str, replies: VecDeque<Reply>) -> &Self {
        assert!(!replies.is_empty(), "route {method} {path} needs a reply");
        self.state
            .lock()
            .unwrap()
            .routes
            .insert(format!("{method} {path}"), replies);
        self
    }

    pub fn on(&self, method: Method, path: &str, status: u16, body: Value) -> &Self {
        self.set_route(method, path, VecDeque::from([Reply::Json(status, body)]))
    }

    /// Answer successive requests with `bodies` in order, repeating the last.
    pub fn on_sequence(&self, method: Method, path: &str, bodies: Vec<Value>) -> &Self {
        let replies = bodies.into_iter().map(|b| Reply::Json(200, b)).collect();
        self.set_route(method, path, replies)
    }

    pub fn on_bytes(&self, method: Method, path: &str, body: &[u8]) -> &Self {
        self.set_route(
            method,
            path,
            VecDeque::from([Reply::Bytes(200, body.to_vec())]),
        )
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Requests matching `method` and `path`, in arrival order.
    pub fn requests_to(&self, method: Method, path: &str) -> Vec<Recorded> {
        let method = method.to_string();
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }
}

impl Drop for MockDaemon {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn handle(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parsed = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
    };
    let key = format!("{} {}", method, uri.path());
    let reply = {
        let mut state = state.lock().unwrap();
        state.requests.push(Recorded {
            method: method.to_string(),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            body: parsed,
            authorization: headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        });
        state.next_reply(&key)
    };
    match reply {
        Some(Reply::Json(status, value)) => {
            (status_code(status), axum::Json(value)).into_response()
        }
        Some(Reply::Bytes(status, bytes)) => (
            status_code(status),
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            axum::Json(json!({ "error": format!("no route for {key}") })),
        )
            .into_response(),
    }
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).expect("valid status code")
}

/// Isolated working directory and credentials file for one CLI run.
pub struct CliHome {
    pub dir: TempDir,
}

impl CliHome {
    pub fn new() -> Self {
        crate::test_log!("FIXTURE: creating isolated CLI home");
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("agentlab").join("config.json")
    }

    pub fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(env!("CARGO_BIN_EXE_agentlab"));
        cmd.current_dir(self.dir.path())
            .env("HOME", self.dir.path())
            .env("AGENTLAB_CONFIG", self.config_path())
            .env("NO_PROXY", "*")
            .env("no_proxy", "*")
            .stdin(Stdio::null());
        for var in [
            "AGENTLAB_ENDPOINT",
            "AGENTLAB_TOKEN",
            "AGENTLAB_SOCKET",
            "AGENTLAB_JUMP_HOST",
            "AGENTLAB_JUMP_USER",
            "AGENTLAB_SSH_IDENTITY",
            "HTTP_PROXY",
            "HTTPS_PROXY",
            "ALL_PROXY",
            "http_proxy",
            "https_proxy",
            "all_proxy",
        ] {
            cmd.env_remove(var);
        }
        cmd
    }

    pub async fn run(&self, args: &[&str]) -> Output {
        let output = self
            .command()
            .args(args)
            .output()
            .await
            .expect("Failed to run agentlab");
        super::logging::log_run(args, &output);
        output
    }

    /// Run against the mock daemon with an explicit endpoint and token.
    pub async fn run_against(&self, daemon: &MockDaemon, args: &[&str]) -> Output {
        let mut full = vec!["--endpoint", daemon.endpoint.as_str(), "--token", "t0ken-abc"];
        full.extend_from_slice(args);
        self.run(&full).await
    }
}

pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
