//! Push streaming client
//!
//! [`PushClient`] owns the session handshake, the background stream reader
//! task, and the subscription table. Session and table state is shared
//! between caller tasks and the reader behind one mutex; the lock is never
//! held across an await, so control round-trips and stream reads always run
//! unlocked.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::Client;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use pushline_core::protocol::{
    BIND_SESSION_PATH, CREATE_SESSION_PATH, OK, OP_ADD, OP_DELETE, OP_DESTROY,
};

use crate::control::send_control;
use crate::error::{PushClientError, Result};
use crate::session::Session;
use crate::stream::{run_stream, LineReader};
use crate::subscription::Subscription;
use crate::table::SubscriptionTable;

type ErrorListener = Arc<dyn Fn(&PushClientError) + Send + Sync>;

/// Client for a line-delimited server-push streaming protocol.
///
/// Cheap to clone; clones share the session, the subscription table, and
/// the background reader task.
#[derive(Clone)]
pub struct PushClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    http: Client,
    base_url: Url,
    state: Mutex<ClientState>,
    error_listener: Mutex<Option<ErrorListener>>,
}

#[derive(Default)]
struct ClientState {
    session: Option<Session>,
    table: SubscriptionTable,
    reader: Option<JoinHandle<()>>,
}

impl PushClient {
    /// Create a client for the given base address.
    ///
    /// The underlying HTTP client carries no request timeouts: the protocol
    /// blocks on stream reads indefinitely by design, and control requests
    /// share the same discipline (a stalled server blocks the caller).
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder().build()?;
        let base_url = Url::parse(base_url)?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                state: Mutex::new(ClientState::default()),
                error_listener: Mutex::new(None),
            }),
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Id of the active session, if any.
    pub fn session_id(&self) -> Option<String> {
        let state = self.inner.state.lock();
        state.session.as_ref().map(|s| s.id().to_string())
    }

    /// Number of rebinds performed on the active session (0 right after
    /// connect, 0 when no session is active).
    pub fn bind_count(&self) -> u64 {
        let state = self.inner.state.lock();
        state.session.as_ref().map(Session::bind_count).unwrap_or(0)
    }

    /// Whether a session is currently established.
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().session.is_some()
    }

    /// Keys of the currently registered subscriptions, ascending.
    pub fn active_subscriptions(&self) -> Vec<u64> {
        self.inner.state.lock().table.keys()
    }

    /// Register an observer for errors surfaced by the background reader:
    /// malformed data lines, updates for unknown tables, listener decode
    /// failures, and terminal stream outcomes. Replaces any previous
    /// observer.
    pub fn set_error_listener<F>(&self, listener: F)
    where
        F: Fn(&PushClientError) + Send + Sync + 'static,
    {
        *self.inner.error_listener.lock() = Some(Arc::new(listener));
    }

    /// Open a new session.
    ///
    /// Performs the create-session handshake and, on success, starts the
    /// background reader on the same connection. A non-success first line
    /// fails with [`PushClientError::Handshake`] carrying everything the
    /// server sent back, and no reader starts.
    #[instrument(skip(self, token))]
    pub async fn connect(&self, username: &str, token: &str, adapter_set: &str) -> Result<()> {
        debug!("Opening a new session to <{}>", self.inner.base_url);
        let url = self.inner.base_url.join(CREATE_SESSION_PATH)?;
        let form: Vec<(&str, &str)> = [
            ("adapter_set", adapter_set),
            ("user", username),
            ("password", token),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .collect();

        let response = self.inner.http.post(url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PushClientError::Handshake {
                lines: vec![format!("HTTP {status}")],
            });
        }

        let mut reader = LineReader::new(response);
        let properties = read_handshake(&mut reader).await?;
        let session = Session::from_handshake(properties, &self.inner.base_url)?;
        info!("Session <{}> established", session.id());

        let mut state = self.inner.state.lock();
        state.session = Some(session);
        state.reader = Some(spawn_reader(self.inner.clone(), reader));
        Ok(())
    }

    /// Close the active session.
    ///
    /// Sends DESTROY (even if the stream connection is already gone), waits
    /// for the background reader to exit, then clears session and
    /// subscription state. A warning-level no-op when no session is active.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        let Some((session_id, control_url)) = self.inner.snapshot_session() else {
            warn!("No active session to disconnect");
            return Ok(());
        };

        debug!("Closing session <{}>", session_id);
        let destroy = send_control(
            &self.inner.http,
            &control_url,
            &session_id,
            vec![("op", OP_DESTROY.to_string())],
        )
        .await;
        if let Err(err) = destroy {
            warn!("Destroy request failed: {err}");
        }

        let reader = self.inner.state.lock().reader.take();
        if let Some(reader) = reader {
            debug!("Waiting for the stream reader to finish");
            let _ = reader.await;
        }

        let mut state = self.inner.state.lock();
        state.session = None;
        state.table.reset();
        info!("Session closed");
        Ok(())
    }

    /// Register a subscription and request it from the server.
    ///
    /// The table key is assigned and the subscription registered before the
    /// server confirms; a refused ADD leaves the registration in place and
    /// is only logged (see DESIGN.md). Returns the key regardless of the
    /// confirmation outcome. Transport failures propagate, also with the
    /// registration left in place.
    #[instrument(skip(self, subscription))]
    pub async fn subscribe(&self, subscription: Subscription) -> Result<u64> {
        let snapshot = if subscription.snapshot() {
            "true".to_string()
        } else {
            String::new()
        };
        let adapter = subscription.data_adapter().to_string();
        let mode = subscription.mode().to_string();
        let schema = subscription.fields().join(" ");
        let id = subscription.items().join(" ");

        let (key, session_id, control_url) = {
            let mut state = self.inner.state.lock();
            let Some(session) = state.session.as_ref() else {
                return Err(PushClientError::NoSession);
            };
            let session_id = session.id().to_string();
            let control_url = session.control_url().clone();
            let key = state.table.register(subscription);
            (key, session_id, control_url)
        };

        debug!("Subscription request for table {key}");
        let response = send_control(
            &self.inner.http,
            &control_url,
            &session_id,
            vec![
                ("table", key.to_string()),
                ("op", OP_ADD.to_string()),
                ("snapshot", snapshot),
                ("data_adapter", adapter),
                ("mode", mode),
                ("schema", schema),
                ("id", id),
            ],
        )
        .await?;

        if response == OK {
            info!("Subscribed as table {key}");
        } else {
            // the registration deliberately stays in place; see DESIGN.md
            warn!("Subscription {key} refused: <{response}>");
        }
        Ok(key)
    }

    /// Unregister the subscription under `key`.
    ///
    /// The entry is removed only when the server confirms the DELETE;
    /// returns whether it did. A refused DELETE leaves the entry registered.
    /// An unknown key fails with [`PushClientError::UnknownSubscription`]
    /// without contacting the server.
    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, key: u64) -> Result<bool> {
        let (session_id, control_url) = {
            let state = self.inner.state.lock();
            if !state.table.contains(key) {
                warn!("No subscription {key} found");
                return Err(PushClientError::UnknownSubscription(key));
            }
            match state.session.as_ref() {
                Some(session) => (session.id().to_string(), session.control_url().clone()),
                None => return Err(PushClientError::NoSession),
            }
        };

        debug!("Unsubscription request for table {key}");
        let response = send_control(
            &self.inner.http,
            &control_url,
            &session_id,
            vec![("table", key.to_string()), ("op", OP_DELETE.to_string())],
        )
        .await?;

        if response == OK {
            self.inner.state.lock().table.remove(key);
            info!("Unsubscribed table {key}");
            Ok(true)
        } else {
            warn!("Unsubscription of table {key} refused: <{response}>");
            Ok(false)
        }
    }

    /// Unregister every subscription, one DELETE per key.
    ///
    /// Works on a snapshot of the registered keys, so removals that happen
    /// concurrently are tolerated. Only confirmed entries are removed; there
    /// is no atomicity across the batch, and a partial failure leaves a
    /// mixed table. Returns the number of confirmed removals.
    #[instrument(skip(self))]
    pub async fn unsubscribe_all(&self) -> Result<usize> {
        let keys = self.inner.state.lock().table.keys();
        debug!("Unsubscribing {} tables", keys.len());

        let mut removed = 0;
        for key in keys {
            let Some((session_id, control_url)) = self.inner.snapshot_session() else {
                warn!("Session went away mid-batch, {removed} tables removed");
                break;
            };
            let response = send_control(
                &self.inner.http,
                &control_url,
                &session_id,
                vec![("table", key.to_string()), ("op", OP_DELETE.to_string())],
            )
            .await;
            match response {
                Ok(line) if line == OK => {
                    self.inner.state.lock().table.remove(key);
                    info!("Unsubscribed table {key}");
                    removed += 1;
                }
                Ok(line) => warn!("Unsubscription of table {key} refused: <{line}>"),
                Err(err) => warn!("Unsubscription of table {key} failed: {err}"),
            }
        }
        Ok(removed)
    }
}

impl fmt::Debug for PushClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl ClientInner {
    /// Id and control URL of the active session, if any.
    fn snapshot_session(&self) -> Option<(String, Url)> {
        let state = self.state.lock();
        state
            .session
            .as_ref()
            .map(|s| (s.id().to_string(), s.control_url().clone()))
    }

    /// Rebind the active session on a fresh stream connection.
    ///
    /// Called by the reader task on LOOP as its final act: the successor
    /// reader is spawned in here, before the calling task returns.
    pub(crate) async fn bind(self: &Arc<Self>) -> Result<()> {
        let (session_id, control_url) = self
            .snapshot_session()
            .ok_or(PushClientError::NoSession)?;

        debug!("Binding to <{}>", control_url);
        let url = control_url.join(BIND_SESSION_PATH)?;
        let response = self
            .http
            .post(url)
            .form(&[("session", session_id.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PushClientError::Handshake {
                lines: vec![format!("HTTP {status}")],
            });
        }

        let mut reader = LineReader::new(response);
        let properties = read_handshake(&mut reader).await?;

        let mut state = self.state.lock();
        let session = state.session.as_mut().ok_or(PushClientError::NoSession)?;
        session.absorb_rebind(properties, &self.base_url)?;
        let bind_count = session.bind_count();
        state.reader = Some(spawn_reader(Arc::clone(self), reader));
        info!("Bound to <{}> (rebind #{})", control_url, bind_count);
        Ok(())
    }

    /// Route one data line to its subscription and notify its listeners.
    ///
    /// Listeners run outside the state lock, in registration order; a
    /// listener that needs the client again can therefore call back in.
    pub(crate) fn dispatch(&self, table: u64, item_line: &str) -> Result<()> {
        let (update, listeners) = {
            let mut state = self.state.lock();
            let subscription = state
                .table
                .get_mut(table)
                .ok_or(PushClientError::UnknownTable(table))?;
            let update = subscription.apply_update(item_line)?;
            (update, subscription.listeners())
        };
        for listener in listeners {
            listener(&update);
        }
        Ok(())
    }

    /// Tear down after a terminal stream outcome other than LOOP: the
    /// session is gone and every registered subscription with it.
    pub(crate) fn handle_terminal(&self, err: PushClientError) {
        {
            let mut state = self.state.lock();
            state.session = None;
            state.table.reset();
            state.reader = None;
        }
        warn!("Stream terminated: {err}");
        self.report(&err);
    }

    /// Hand a structured error to the registered observer, if any.
    pub(crate) fn report(&self, err: &PushClientError) {
        let listener = self.error_listener.lock().clone();
        if let Some(listener) = listener {
            listener(err);
        }
    }
}

/// Spawn the reader task.
///
/// Boxed because the reader awaits `bind()`, which in turn constructs the
/// successor reader future; without the indirection the future type would
/// contain itself.
fn spawn_reader(inner: Arc<ClientInner>, reader: LineReader) -> JoinHandle<()> {
    let task: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(run_stream(inner, reader));
    tokio::spawn(task)
}

/// Parse a create/bind handshake: the success marker, then `key:value`
/// headers until a blank line. Anything else is surfaced verbatim as a
/// handshake failure.
async fn read_handshake(reader: &mut LineReader) -> Result<HashMap<String, String>> {
    let first = reader.next_line().await?.unwrap_or_default();
    if first != OK {
        let mut lines = vec![first];
        lines.extend(reader.drain().await);
        error!("Server refused the handshake:\n{}", lines.join("\n"));
        return Err(PushClientError::Handshake { lines });
    }

    let mut properties = HashMap::new();
    loop {
        match reader.next_line().await? {
            None => break,
            Some(line) if line.is_empty() => break,
            Some(line) => match line.split_once(':') {
                Some((key, value)) => {
                    properties.insert(key.to_string(), value.to_string());
                }
                None => {
                    return Err(PushClientError::Handshake { lines: vec![line] });
                }
            },
        }
    }
    Ok(properties)
}
