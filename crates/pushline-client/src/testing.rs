//! Test utilities for pushline-client
//!
//! Provides an in-process scripted push server: it serves the create/bind
//! handshake, pushes whatever lines a test scripts onto the stream
//! connection, and records every control and bind request it receives. Used
//! by the integration tests in `pushline-tests`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Form, State};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use pushline_core::protocol::{OK, OP_DESTROY};

const SESSION_ID: &str = "S2f4a18";

/// A scripted push server bound to an ephemeral local port, shut down when
/// dropped.
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

struct ServerState {
    /// Sender feeding the currently open stream connection.
    stream_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    create_requests: Mutex<Vec<HashMap<String, String>>>,
    bind_requests: Mutex<Vec<HashMap<String, String>>>,
    control_requests: Mutex<Vec<HashMap<String, String>>>,
    /// First response line for non-destroy control requests.
    control_response: Mutex<String>,
    /// When set, create/bind answer with these lines instead of a session.
    refusal: Mutex<Option<Vec<String>>>,
}

impl TestServer {
    /// Start the server on an ephemeral port.
    pub async fn start() -> std::io::Result<Self> {
        let state = Arc::new(ServerState {
            stream_tx: Mutex::new(None),
            create_requests: Mutex::new(Vec::new()),
            bind_requests: Mutex::new(Vec::new()),
            control_requests: Mutex::new(Vec::new()),
            control_response: Mutex::new(OK.to_string()),
            refusal: Mutex::new(None),
        });

        let router = Router::new()
            .route("/stream/create_session.txt", post(create_session))
            .route("/stream/bind_session.txt", post(bind_session))
            .route("/stream/control.txt", post(control))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Base URL for a client pointed at this server.
    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Session id handed out by the handshake.
    pub fn session_id(&self) -> &'static str {
        SESSION_ID
    }

    /// Push one raw line onto the open stream connection.
    pub fn push_line(&self, line: &str) {
        if let Some(tx) = self.state.stream_tx.lock().as_ref() {
            let _ = tx.send(format!("{line}\r\n"));
        }
    }

    /// Push a data line for the given table.
    pub fn push_update(&self, table: u64, item_line: &str) {
        self.push_line(&format!("{table},{item_line}"));
    }

    /// Close the stream connection without a terminal protocol message.
    pub fn drop_stream(&self) {
        self.state.stream_tx.lock().take();
    }

    /// Whether a stream connection is currently open.
    pub fn has_stream(&self) -> bool {
        self.state.stream_tx.lock().is_some()
    }

    /// Script the first response line for subsequent control requests.
    pub fn set_control_response(&self, line: &str) {
        *self.state.control_response.lock() = line.to_string();
    }

    /// Make create/bind refuse the handshake with the given lines.
    pub fn refuse_handshake(&self, lines: &[&str]) {
        *self.state.refusal.lock() = Some(lines.iter().map(|l| l.to_string()).collect());
    }

    /// Form parameters of every create-session request, in order.
    pub fn create_requests(&self) -> Vec<HashMap<String, String>> {
        self.state.create_requests.lock().clone()
    }

    /// Form parameters of every bind-session request, in order.
    pub fn bind_requests(&self) -> Vec<HashMap<String, String>> {
        self.state.bind_requests.lock().clone()
    }

    /// Form parameters of every control request, in order.
    pub fn control_requests(&self) -> Vec<HashMap<String, String>> {
        self.state.control_requests.lock().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // the open stream response keeps graceful shutdown waiting
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Wait for a condition with timeout, polling every few milliseconds.
pub async fn wait_for<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

fn open_stream(state: &Arc<ServerState>) -> Response {
    if let Some(lines) = state.refusal.lock().clone() {
        let mut body = lines.join("\r\n");
        body.push_str("\r\n");
        return Response::new(Body::from(body));
    }

    let (tx, rx) = mpsc::unbounded_channel::<String>();
    *state.stream_tx.lock() = Some(tx);

    let header = format!("{OK}\r\nSessionId:{SESSION_ID}\r\n\r\n");
    let body = futures::stream::iter(vec![Ok::<Bytes, Infallible>(Bytes::from(header))]).chain(
        UnboundedReceiverStream::new(rx).map(|line| Ok::<Bytes, Infallible>(Bytes::from(line))),
    );
    Response::new(Body::from_stream(body))
}

async fn create_session(
    State(state): State<Arc<ServerState>>,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    state.create_requests.lock().push(params);
    open_stream(&state)
}

async fn bind_session(
    State(state): State<Arc<ServerState>>,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    state.bind_requests.lock().push(params);
    open_stream(&state)
}

async fn control(
    State(state): State<Arc<ServerState>>,
    Form(params): Form<HashMap<String, String>>,
) -> String {
    let op = params.get("op").cloned().unwrap_or_default();
    state.control_requests.lock().push(params);

    if op == OP_DESTROY {
        let tx = state.stream_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send("END session destroyed\r\n".to_string());
        }
        return format!("{OK}\r\n");
    }

    format!("{}\r\n", state.control_response.lock().clone())
}
