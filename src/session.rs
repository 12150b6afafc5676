//! Session (C5, spec §4.5).
//!
//! One WebSocket connection's lifecycle: the auth handshake, the initial
//! subscription, the receive loop with request correlation, the keepalive
//! task, and the reconnect policy. Wiring mirrors the teacher's
//! `websocket.rs`/`background_connection.rs` split -- a thin connect
//! function that returns a split sink/stream, and a supervisor that owns
//! the socket for one connection generation and spawns the receive and
//! keepalive tasks against it -- generalized from the binary protobuf
//! protocol to `v1.json.spacetimedb` text frames.

use crate::codec::{decode_frame, FrameKind, InboundMessage, OutboundMessage, TableOp};
use crate::config::{Endpoint, PipelineConfig, SessionConfig, CORE_TABLES, PROTOCOL_SUBPROTOCOL};
use crate::credentials::{Credential, CredentialStore};
use crate::error::BlackholioError;
use crate::pipeline::{DataPipeline, Payload};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use http::StatusCode;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, WsMessage>;
type WsRead = SplitStream<WsStream>;

/// Session lifecycle state (spec §3, §4.5). Initial `Disconnected`, terminal
/// `Failed` only after the retry budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Events the receive loop emits to the caller, mirroring the inbound
/// discriminators of spec §4.1/§4.5.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected,
    Disconnected { duration: Duration, messages_received: u64, bytes_received: u64 },
    IdentityToken { identity: String, token: String },
    InitialSubscription { tables: Value },
    TransactionUpdate { tables: Value, timestamp: Option<f64> },
    SubscriptionUpdate { status: Option<String>, tables: Value },
    TransactionCommit { status: String },
    ServerError { message: String, code: Option<String> },
    RawMessage(Value),
    Reconnecting { attempt: u32, delay: Duration },
    Failed { reason: String },
}

type CompletionSlot = oneshot::Sender<Result<Value, BlackholioError>>;

/// Request/response correlation registry (spec §3). Entries are created on
/// send and removed on first resolution or bulk-cancelled on disconnect.
#[derive(Default)]
struct CorrelationRegistry {
    slots: Mutex<HashMap<String, CompletionSlot>>,
}

impl CorrelationRegistry {
    fn register(&self, request_id: String, slot: CompletionSlot) {
        self.slots.lock().expect("correlation registry mutex poisoned").insert(request_id, slot);
    }

    fn take(&self, request_id: &str) -> Option<CompletionSlot> {
        self.slots.lock().expect("correlation registry mutex poisoned").remove(request_id)
    }

    fn remove(&self, request_id: &str) {
        self.slots.lock().expect("correlation registry mutex poisoned").remove(request_id);
    }

    /// Fails every outstanding slot with a connection-lost error (graceful
    /// disconnect / reconnect).
    fn cancel_all(&self) {
        let mut slots = self.slots.lock().expect("correlation registry mutex poisoned");
        for (_, slot) in slots.drain() {
            let _ = slot.send(Err(BlackholioError::connection_lost("session disconnected; completion slot cancelled")));
        }
    }

    fn len(&self) -> usize {
        self.slots.lock().expect("correlation registry mutex poisoned").len()
    }
}

fn now_unix_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

fn now_unix_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// A single WebSocket connection to a SpacetimeDB endpoint.
///
/// `connect` spawns the receive loop and the keepalive task and returns
/// both the session handle and the event stream; [`Session::disconnect`]
/// tears both down deterministically (spec testable property 7).
pub struct Session {
    endpoint: Endpoint,
    config: SessionConfig,
    state: Mutex<SessionState>,
    write: AsyncMutex<Option<WsWrite>>,
    correlation: CorrelationRegistry,
    request_counter: AtomicU64,
    subscriptions_active: AtomicBool,
    last_data_at: Mutex<Option<f64>>,
    is_open: AtomicBool,
    negotiated_subprotocol: Mutex<Option<String>>,
    events_tx: tokio::sync::mpsc::UnboundedSender<SessionEvent>,
    receive_handle: Mutex<Option<JoinHandle<()>>>,
    keepalive_handle: Mutex<Option<JoinHandle<()>>>,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
    connected_at: Mutex<Option<Instant>>,
    credentials: Arc<Mutex<CredentialStore>>,
    reconnect_handle: Mutex<Option<JoinHandle<()>>>,
    pipeline: DataPipeline,
}

enum DialOutcome {
    Opened { stream: WsStream, subprotocol: Option<String> },
    AuthChallenge { identity: String, token: String },
    Fatal(BlackholioError),
}

impl Session {
    /// Runs the full connect sequence (spec §4.5 steps 1-6) and returns the
    /// connected session plus its event stream.
    pub async fn connect(
        endpoint: Endpoint,
        config: SessionConfig,
        credentials: Arc<Mutex<CredentialStore>>,
    ) -> Result<(Arc<Session>, tokio::sync::mpsc::UnboundedReceiver<SessionEvent>), BlackholioError> {
        endpoint.validate()?;

        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut pipeline_config = PipelineConfig::default();
        pipeline_config.server_language = endpoint.language;
        let pipeline = DataPipeline::new(pipeline_config);
        let session = Arc::new(Session {
            endpoint,
            config,
            state: Mutex::new(SessionState::Connecting),
            write: AsyncMutex::new(None),
            correlation: CorrelationRegistry::default(),
            request_counter: AtomicU64::new(0),
            subscriptions_active: AtomicBool::new(false),
            last_data_at: Mutex::new(None),
            is_open: AtomicBool::new(false),
            negotiated_subprotocol: Mutex::new(None),
            events_tx,
            receive_handle: Mutex::new(None),
            keepalive_handle: Mutex::new(None),
            messages_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            connected_at: Mutex::new(None),
            credentials: Arc::clone(&credentials),
            reconnect_handle: Mutex::new(None),
            pipeline,
        });

        session.establish(credentials).await?;
        Ok((session, events_rx))
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().expect("session state mutex poisoned") = state;
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state mutex poisoned")
    }

    pub fn subscriptions_active(&self) -> bool {
        self.subscriptions_active.load(Ordering::Relaxed)
    }

    pub fn last_data_at(&self) -> Option<f64> {
        *self.last_data_at.lock().expect("last_data_at mutex poisoned")
    }

    /// Polls `subscriptions_active` up to `timeout`, the way the source's
    /// `wait_for_subscription_data` does (spec scenario S8).
    pub async fn wait_for_subscription_data(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.subscriptions_active() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Never raises: tries the single predicate this crate's connection
    /// type actually exposes. The source probed `closed`/`close_code`/
    /// `state` in turn across differing WebSocket libraries (spec §4.5,
    /// §9); with one typed connection type there is only one attribute to
    /// probe, so the duck-typed fallback chain collapses to a flag read.
    pub fn is_websocket_open(&self) -> bool {
        self.is_open.load(Ordering::Relaxed)
    }

    async fn dial(&self, credentials: &Arc<Mutex<CredentialStore>>) -> DialOutcome {
        let url = self.endpoint.websocket_url();
        let existing = credentials
            .lock()
            .expect("credential store mutex poisoned")
            .get(&self.endpoint.host, &self.endpoint.database_name)
            .cloned();

        let mut request = match url.into_client_request() {
            Ok(req) => req,
            Err(e) => return DialOutcome::Fatal(BlackholioError::server_configuration(format!("invalid websocket URL: {e}"), "host")),
        };
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", PROTOCOL_SUBPROTOCOL.parse().expect("static subprotocol name is a valid header value"));
        if let Some(cred) = &existing {
            if let Ok(value) = format!("Bearer {}", cred.token).parse() {
                request.headers_mut().insert("Authorization", value);
            }
        }

        match connect_async(request).await {
            Ok((stream, response)) => {
                let subprotocol = response
                    .headers()
                    .get("Sec-WebSocket-Protocol")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                DialOutcome::Opened { stream, subprotocol }
            }
            Err(tokio_tungstenite::tungstenite::Error::Http(response)) if response.status() == StatusCode::BAD_REQUEST => {
                let identity = response.headers().get("spacetime-identity").and_then(|v| v.to_str().ok()).map(str::to_string);
                let token = response.headers().get("spacetime-identity-token").and_then(|v| v.to_str().ok()).map(str::to_string);
                match (identity, token) {
                    (Some(identity), Some(token)) => DialOutcome::AuthChallenge { identity, token },
                    _ => DialOutcome::Fatal(BlackholioError::authentication("HTTP 400 without identity challenge headers")),
                }
            }
            Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
                let status = response.status();
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    DialOutcome::Fatal(BlackholioError::authentication(format!("server rejected credentials with HTTP {status}")))
                } else {
                    DialOutcome::Fatal(BlackholioError::server_unavailable(format!("dial failed with HTTP {status}")))
                }
            }
            Err(e) => DialOutcome::Fatal(BlackholioError::server_unavailable(format!("dial failed: {e}"))),
        }
    }

    async fn establish(self: &Arc<Self>, credentials: Arc<Mutex<CredentialStore>>) -> Result<(), BlackholioError> {
        self.set_state(SessionState::Connecting);

        let deadline = Instant::now() + self.config.connection_timeout;
        let stream = loop {
            let outcome = tokio::time::timeout(
                deadline.saturating_duration_since(Instant::now()).max(Duration::from_millis(1)),
                self.dial(&credentials),
            )
            .await
            .map_err(|_| BlackholioError::timeout("connect", self.config.connection_timeout))?;

            match outcome {
                DialOutcome::Opened { stream, subprotocol } => break (stream, subprotocol),
                DialOutcome::AuthChallenge { identity, token } => {
                    let cred = Credential::new(identity, token, self.endpoint.host.clone(), self.endpoint.database_name.clone());
                    credentials
                        .lock()
                        .expect("credential store mutex poisoned")
                        .put(cred)
                        .map_err(|e| BlackholioError::authentication(format!("failed to persist credential: {e}")))?;
                    continue;
                }
                DialOutcome::Fatal(e) => return Err(e),
            }
        };

        let (ws_stream, negotiated) = stream;
        if negotiated.as_deref() != Some(PROTOCOL_SUBPROTOCOL) {
            tracing::warn!(negotiated = ?negotiated, expected = PROTOCOL_SUBPROTOCOL, "server negotiated an unexpected subprotocol");
        }
        *self.negotiated_subprotocol.lock().expect("subprotocol mutex poisoned") = negotiated;

        let (write, read) = ws_stream.split();
        *self.write.lock().await = Some(write);
        self.is_open.store(true, Ordering::Relaxed);
        *self.connected_at.lock().expect("connected_at mutex poisoned") = Some(Instant::now());

        let query_strings = CORE_TABLES.iter().map(|t| format!("SELECT * FROM {t}")).collect();
        self.send_raw(OutboundMessage::Subscribe { query_strings }).await?;

        self.spawn_receive_loop(read);
        self.spawn_keepalive();

        self.set_state(SessionState::Connected);
        let _ = self.events_tx.send(SessionEvent::Connected);
        Ok(())
    }

    async fn send_raw(&self, message: OutboundMessage) -> Result<(), BlackholioError> {
        let mut guard = self.write.lock().await;
        let write = guard.as_mut().ok_or_else(|| BlackholioError::game_state("send attempted with no open connection"))?;
        write
            .send(WsMessage::Text(message.encode().into()))
            .await
            .map_err(|e| BlackholioError::connection_lost(format!("send failed: {e}")))
    }

    /// Sends a `CallReducer` request and registers a completion slot,
    /// returning a future the caller awaits with its own timeout via
    /// [`Session::send_request`].
    async fn dispatch_request(&self, reducer: &str, args: Value) -> Result<(String, oneshot::Receiver<Result<Value, BlackholioError>>), BlackholioError> {
        if self.state() != SessionState::Connected {
            return Err(BlackholioError::game_state(format!("cannot call '{reducer}': session is not connected")));
        }
        let request_id = format!(
            "req_{}_{}",
            self.request_counter.fetch_add(1, Ordering::Relaxed),
            now_unix_millis()
        );
        let (tx, rx) = oneshot::channel();
        self.correlation.register(request_id.clone(), tx);

        let mut envelope = args;
        if let Some(obj) = envelope.as_object_mut() {
            obj.insert("request_id".to_string(), Value::String(request_id.clone()));
        }

        if let Err(e) = self.send_raw(OutboundMessage::CallReducer { reducer: reducer.to_string(), args: envelope }).await {
            self.correlation.remove(&request_id);
            return Err(e);
        }
        Ok((request_id, rx))
    }

    /// Calls a reducer and awaits its response, failing with a `Timeout`
    /// kind tagged with the reducer name if no response arrives in time
    /// (spec scenario S5).
    pub async fn send_request(&self, reducer: &str, args: Value, timeout: Duration) -> Result<Value, BlackholioError> {
        let (request_id, rx) = self.dispatch_request(reducer, args).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BlackholioError::connection_lost("completion slot dropped before resolution")),
            Err(_) => {
                self.correlation.remove(&request_id);
                Err(BlackholioError::timeout(reducer, timeout))
            }
        }
    }

    /// Calls a reducer whose args are a canonical game record (spec §4.5
    /// "serialize via C4"): routes `payload` through the data pipeline --
    /// validate, adapt to the server's dialect, serialize -- before
    /// wrapping it in the `CallReducer` envelope. [`Session::send_request`]
    /// remains the path for reducers with no canonical record shape (most
    /// reducer args are bare scalars with no registered schema, and the
    /// pipeline has no schema to validate those against).
    pub async fn send_typed_request(&self, reducer: &str, type_name: &str, payload: Value, timeout: Duration) -> Result<Value, BlackholioError> {
        let wire = self.pipeline.process_outbound(Payload::Single(payload), type_name, now_unix_seconds())?;
        let args: Value = serde_json::from_str(&wire).map_err(|e| BlackholioError::protocol(format!("pipeline produced non-JSON args: {e}")))?;
        self.send_request(reducer, args, timeout).await
    }

    /// One-off SQL query path (spec §6, SPEC_FULL §3): reuses the same
    /// correlation mechanism as reducer calls.
    pub async fn one_off_query(&self, query: &str, timeout: Duration) -> Result<Value, BlackholioError> {
        if self.state() != SessionState::Connected {
            return Err(BlackholioError::game_state("cannot query: session is not connected"));
        }
        let request_id = format!(
            "req_{}_{}",
            self.request_counter.fetch_add(1, Ordering::Relaxed),
            now_unix_millis()
        );
        let (tx, rx) = oneshot::channel();
        self.correlation.register(request_id.clone(), tx);
        if let Err(e) = self.send_raw(OutboundMessage::OneOffQuery { query: query.to_string() }).await {
            self.correlation.remove(&request_id);
            return Err(e);
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BlackholioError::connection_lost("completion slot dropped before resolution")),
            Err(_) => {
                self.correlation.remove(&request_id);
                Err(BlackholioError::timeout("one_off_query", timeout))
            }
        }
    }

    fn spawn_receive_loop(self: &Arc<Self>, mut read: WsRead) {
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let frame = match frame {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket read error; ending receive loop");
                        break;
                    }
                };
                match frame {
                    WsMessage::Text(text) => {
                        session.bytes_received.fetch_add(text.len() as u64, Ordering::Relaxed);
                        session.messages_received.fetch_add(1, Ordering::Relaxed);
                        match decode_frame(FrameKind::Text, text.as_bytes()) {
                            Ok(msg) => session.route(msg),
                            Err(e) => tracing::warn!(error = %e, "dropping malformed inbound frame"),
                        }
                    }
                    WsMessage::Binary(payload) => {
                        session.bytes_received.fetch_add(payload.len() as u64, Ordering::Relaxed);
                        session.messages_received.fetch_add(1, Ordering::Relaxed);
                        match decode_frame(FrameKind::Binary, &payload) {
                            Ok(msg) => session.route(msg),
                            Err(e) => tracing::warn!(error = %e, "dropping malformed inbound binary frame"),
                        }
                    }
                    WsMessage::Close(_) => {
                        tracing::info!("server closed the connection");
                        break;
                    }
                    WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
                }
            }
            session.on_connection_lost();
        });
        *self.receive_handle.lock().expect("receive_handle mutex poisoned") = Some(handle);
    }

    fn route(self: &Arc<Self>, message: InboundMessage) {
        if let Some(request_id) = message.request_id() {
            if let Some(slot) = self.correlation.take(request_id) {
                let resolved = match &message {
                    InboundMessage::DatabaseUpdate { tables, .. } => Ok(tables.clone()),
                    InboundMessage::Raw(value) => match value.get("error") {
                        Some(err) => Err(BlackholioError::protocol(err.to_string())),
                        None => Ok(value.get("result").cloned().unwrap_or_else(|| value.clone())),
                    },
                    _ => Ok(Value::Null),
                };
                let _ = slot.send(resolved);
                return;
            }
        }

        match message {
            InboundMessage::IdentityToken { identity, token, .. } => {
                let _ = self.events_tx.send(SessionEvent::IdentityToken { identity, token });
            }
            InboundMessage::InitialSubscription { tables } => {
                self.mark_subscription_data();
                let adapted: serde_json::Map<String, Value> = tables
                    .iter()
                    .map(|t| (t.table_name.clone(), json!({ "rows": self.adapt_inbound_rows(&t.table_name, &t.rows) })))
                    .collect();
                let _ = self.events_tx.send(SessionEvent::InitialSubscription { tables: Value::Object(adapted) });
            }
            InboundMessage::TransactionUpdate { timestamp, tables } => {
                self.mark_subscription_data();
                let adapted: serde_json::Map<String, Value> = tables
                    .iter()
                    .map(|t| {
                        let op = match t.op {
                            TableOp::Insert => "insert",
                            TableOp::Update => "update",
                            TableOp::Delete => "delete",
                        };
                        (t.table_name.clone(), json!({ "operation": op, "rows": self.adapt_inbound_rows(&t.table_name, &t.rows) }))
                    })
                    .collect();
                let _ = self.events_tx.send(SessionEvent::TransactionUpdate { tables: Value::Object(adapted), timestamp });
            }
            InboundMessage::TransactionCommit { status, .. } => {
                let _ = self.events_tx.send(SessionEvent::TransactionCommit { status });
            }
            InboundMessage::SubscriptionUpdate { status, tables, .. } => {
                self.mark_subscription_data();
                let _ = self.events_tx.send(SessionEvent::SubscriptionUpdate { status, tables });
            }
            InboundMessage::Error { message, code, .. } => {
                let _ = self.events_tx.send(SessionEvent::ServerError { message, code });
            }
            InboundMessage::DatabaseUpdate { tables, .. } => {
                let _ = self.events_tx.send(SessionEvent::RawMessage(tables));
            }
            InboundMessage::Raw(value) => {
                let _ = self.events_tx.send(SessionEvent::RawMessage(value));
            }
        }
    }

    /// The subset of core tables (spec §4.5 step 5) with a registered
    /// canonical model; `food`/`config` rows have no schema and pass
    /// through the pipeline untouched.
    fn type_name_for_table(table_name: &str) -> Option<&'static str> {
        match table_name {
            "entity" => Some("Entity"),
            "player" => Some("Player"),
            "circle" => Some("Circle"),
            _ => None,
        }
    }

    /// Adapts and validates each row of `table_name` through the data
    /// pipeline (spec §2 inbound path: C1 -> C5 -> C4 -> C2 -> C3 ->
    /// typed object). A row that fails adaptation/conversion/validation is
    /// logged and passed through raw rather than dropped: a
    /// `TransactionUpdate` delta may carry only the changed fields of a
    /// record, not a complete one, and losing it silently would desync
    /// caller state worse than handing over an unadapted row.
    fn adapt_inbound_rows(&self, table_name: &str, rows: &[Value]) -> Vec<Value> {
        let Some(type_name) = Self::type_name_for_table(table_name) else {
            return rows.to_vec();
        };
        rows.iter()
            .map(|row| match self.pipeline.process_inbound(&row.to_string(), type_name) {
                Ok(Payload::Single(v)) => v,
                Ok(Payload::List(_)) => row.clone(),
                Err(e) => {
                    tracing::warn!(table = table_name, error = %e, "pipeline could not adapt/validate row; passing through raw");
                    row.clone()
                }
            })
            .collect()
    }

    fn mark_subscription_data(&self) {
        self.subscriptions_active.store(true, Ordering::Relaxed);
        *self.last_data_at.lock().expect("last_data_at mutex poisoned") = Some(now_unix_seconds());
    }

    fn spawn_keepalive(self: &Arc<Self>) {
        let session = Arc::clone(self);
        let interval = self.config.heartbeat_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if session.state() != SessionState::Connected {
                    break;
                }
                let mut guard = session.write.lock().await;
                let Some(write) = guard.as_mut() else { break };
                if write.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    drop(guard);
                    session.on_connection_lost();
                    break;
                }
            }
        });
        *self.keepalive_handle.lock().expect("keepalive_handle mutex poisoned") = Some(handle);
    }

    fn on_connection_lost(self: &Arc<Self>) {
        if self.state() == SessionState::Disconnected || self.state() == SessionState::Failed {
            return;
        }
        self.is_open.store(false, Ordering::Relaxed);
        self.subscriptions_active.store(false, Ordering::Relaxed);
        self.set_state(SessionState::Disconnected);
        self.correlation.cancel_all();
        if let Some(handle) = self.keepalive_handle.lock().expect("keepalive_handle mutex poisoned").take() {
            handle.abort();
        }
        let duration = self
            .connected_at
            .lock()
            .expect("connected_at mutex poisoned")
            .map(|t| t.elapsed())
            .unwrap_or_default();
        let _ = self.events_tx.send(SessionEvent::Disconnected {
            duration,
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        });
        self.spawn_reconnect();
    }

    /// Retries the connect sequence with exponential backoff (spec §4.5
    /// "Reconnect policy"): retryable dial errors schedule another attempt
    /// up to `max_attempts`; a non-retryable error (auth, bad config)
    /// transitions directly to `Failed` without spending further attempts.
    fn spawn_reconnect(self: &Arc<Self>) {
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                if attempt > session.config.max_attempts {
                    session.set_state(SessionState::Failed);
                    let _ = session.events_tx.send(SessionEvent::Failed { reason: "reconnect attempts exhausted".into() });
                    return;
                }

                let delay = reconnect_delay(session.config.base_delay, attempt, session.config.max_delay);
                session.set_state(SessionState::Reconnecting);
                let _ = session.events_tx.send(SessionEvent::Reconnecting { attempt, delay });
                tokio::time::sleep(delay).await;

                if session.state() != SessionState::Reconnecting {
                    // A graceful disconnect() raced us; abandon the attempt.
                    return;
                }

                match session.establish(Arc::clone(&session.credentials)).await {
                    Ok(()) => return,
                    Err(e) if !e.is_retryable() => {
                        session.set_state(SessionState::Failed);
                        let _ = session.events_tx.send(SessionEvent::Failed { reason: e.to_string() });
                        return;
                    }
                    Err(_) => continue,
                }
            }
        });
        *self.reconnect_handle.lock().expect("reconnect_handle mutex poisoned") = Some(handle);
    }

    /// Graceful disconnect (spec §4.5, testable property 7): cancel
    /// keepalive, close with code 1000, cancel the receive task, cancel
    /// pending completion slots.
    pub async fn disconnect(&self) {
        if let Some(handle) = self.keepalive_handle.lock().expect("keepalive_handle mutex poisoned").take() {
            handle.abort();
        }
        if let Some(handle) = self.reconnect_handle.lock().expect("reconnect_handle mutex poisoned").take() {
            handle.abort();
        }

        {
            let mut guard = self.write.lock().await;
            if let Some(mut write) = guard.take() {
                let _ = write
                    .send(WsMessage::Close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
                        code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
                        reason: "normal closure".into(),
                    })))
                    .await;
            }
        }

        if let Some(handle) = self.receive_handle.lock().expect("receive_handle mutex poisoned").take() {
            handle.abort();
        }

        self.is_open.store(false, Ordering::Relaxed);
        self.correlation.cancel_all();
        self.set_state(SessionState::Disconnected);
        let duration = self
            .connected_at
            .lock()
            .expect("connected_at mutex poisoned")
            .map(|t| t.elapsed())
            .unwrap_or_default();
        let _ = self.events_tx.send(SessionEvent::Disconnected {
            duration,
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        });
    }

    /// Outstanding correlation-registry size, for tests and diagnostics.
    pub fn pending_requests(&self) -> usize {
        self.correlation.len()
    }
}

/// Computes the reconnect delay for `attempt` (1-indexed), `base * 2^(attempt-1)`
/// plus up to ±10% jitter, capped at `max_delay` (spec §4.5).
pub fn reconnect_delay(base: Duration, attempt: u32, max_delay: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(30);
    let scaled = base.as_secs_f64() * 2f64.powi(exponent as i32);
    let capped = scaled.min(max_delay.as_secs_f64());
    let jitter_fraction = rand::rng().random_range(-0.1..=0.1);
    let jittered = (capped * (1.0 + jitter_fraction)).max(0.0);
    Duration::from_secs_f64(jittered.min(max_delay.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_respects_cap_and_growth() {
        let base = Duration::from_millis(500);
        let max_delay = Duration::from_secs(60);
        let d1 = reconnect_delay(base, 1, max_delay);
        let d2 = reconnect_delay(base, 2, max_delay);
        assert!(d1.as_secs_f64() <= 0.55);
        assert!(d2.as_secs_f64() <= 1.1);

        let d_large = reconnect_delay(base, 20, max_delay);
        assert!(d_large <= max_delay);
    }

    #[test]
    fn correlation_registry_resolves_exactly_once() {
        let registry = CorrelationRegistry::default();
        let (tx, _rx) = oneshot::channel();
        registry.register("req_0_1".into(), tx);
        assert_eq!(registry.len(), 1);
        assert!(registry.take("req_0_1").is_some());
        assert_eq!(registry.len(), 0);
        assert!(registry.take("req_0_1").is_none());
    }

    #[test]
    fn type_name_for_table_covers_core_tables_with_a_canonical_model() {
        assert_eq!(Session::type_name_for_table("entity"), Some("Entity"));
        assert_eq!(Session::type_name_for_table("player"), Some("Player"));
        assert_eq!(Session::type_name_for_table("circle"), Some("Circle"));
        assert_eq!(Session::type_name_for_table("food"), None);
        assert_eq!(Session::type_name_for_table("config"), None);
    }

    #[test]
    fn correlation_registry_cancel_all_resolves_every_slot() {
        let registry = CorrelationRegistry::default();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        registry.register("a".into(), tx1);
        registry.register("b".into(), tx2);
        registry.cancel_all();
        assert_eq!(registry.len(), 0);
        assert!(rx1.try_recv().expect("slot a resolved").is_err());
        assert!(rx2.try_recv().expect("slot b resolved").is_err());
    }
}
