//! One live connection: read loop, dispatch, and write serialization.
//!
//! Outgoing frames go through a single writer task fed by a channel. A
//! sender that gives up waiting never truncates a frame already being
//! written, and a failed write closes the connection.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use ezrpc_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::envelope::{Envelope, ErrorObject, Id, Inbound, Malformed};
use crate::error::{Result, RpcError};
use crate::hooks::{HookRegistry, HookResult, LifecycleHook, NotificationHook, RequestHook};
use crate::pending::{PendingCall, PendingTable};
use crate::stats::{Counters, RemoteStats, Traffic};

/// Built-in request answered with its own params.
pub const PING: &str = "PING";
/// Built-in notification asking the receiver to close the connection.
pub const TERM: &str = "TERM";
/// Built-in request answered by server-side Remotes with their id and the
/// server start time.
pub const ETC_INIT: &str = "ETC.INIT";

const DEFAULT_MAX_FRAME_ERRORS: usize = 16;
const OUTBOX_CAPACITY: usize = 256;

/// Connection lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Connecting,
    /// Accepts new outgoing requests and notifications.
    Open,
    /// No new sends; buffered inbound frames are still dispatched.
    Closing,
    /// Terminal. Every pending request has failed with `ConnectionClosed`.
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        })
    }
}

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Framing for both directions.
    pub frame: FrameConfig,
    /// Deadline applied by [`Remote::request`]. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Oversized frames tolerated before the connection is closed.
    /// `None` never closes for that reason.
    pub max_frame_errors: Option<usize>,
    /// Install the `PING` and `TERM` hooks (and `ETC.INIT` on servers).
    pub builtin_hooks: bool,
    /// Validate inbound params before dispatch.
    #[cfg(feature = "schema")]
    pub schema: Option<Arc<ezrpc_schema::SchemaRegistry>>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            request_timeout: None,
            max_frame_errors: Some(DEFAULT_MAX_FRAME_ERRORS),
            builtin_hooks: true,
            #[cfg(feature = "schema")]
            schema: None,
        }
    }
}

impl RemoteConfig {
    pub fn with_frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_frame_errors(mut self, limit: Option<usize>) -> Self {
        self.max_frame_errors = limit;
        self
    }

    pub fn with_builtin_hooks(mut self, enabled: bool) -> Self {
        self.builtin_hooks = enabled;
        self
    }

    #[cfg(feature = "schema")]
    pub fn with_schema(mut self, registry: Arc<ezrpc_schema::SchemaRegistry>) -> Self {
        self.schema = Some(registry);
        self
    }
}

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One encoded envelope waiting for the writer task.
struct Outgoing {
    bytes: Vec<u8>,
    traffic: Traffic,
    done: oneshot::Sender<std::result::Result<usize, FrameError>>,
}

struct RemoteInner {
    id: String,
    peer: String,
    config: RemoteConfig,
    state: watch::Sender<State>,
    outbox: mpsc::Sender<Outgoing>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<PendingTable>,
    next_id: AtomicI64,
    shutdown: CancellationToken,
    shared: Arc<HookRegistry>,
    local: HookRegistry,
    counters: Counters,
    opened_at: SystemTime,
}

/// Handle to one live connection.
///
/// Cheap to clone; every clone drives the same connection. Both ends of a
/// connection are symmetric: either may send requests and notifications,
/// and either answers the other's requests through its hooks.
#[derive(Clone)]
pub struct Remote {
    inner: Arc<RemoteInner>,
}

impl Remote {
    /// Take ownership of a connected stream and start its read loop.
    ///
    /// Must be called from within a tokio runtime. `hooks` is consulted
    /// first for every inbound method; the Remote's own built-ins second.
    pub fn spawn<S>(
        stream: S,
        id: impl Into<String>,
        peer: impl Into<String>,
        hooks: Arc<HookRegistry>,
        config: RemoteConfig,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::spawn_with_local(stream, id.into(), peer.into(), hooks, HookRegistry::new(), config)
    }

    pub(crate) fn spawn_with_local<S>(
        stream: S,
        id: String,
        peer: String,
        shared: Arc<HookRegistry>,
        local: HookRegistry,
        config: RemoteConfig,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if config.builtin_hooks {
            install_builtins(&local);
        }

        let (read_half, write_half) = tokio::io::split(stream);
        let reader = FrameReader::with_config(read_half, config.frame.clone());
        let writer: FrameWriter<BoxWriter> =
            FrameWriter::with_config(Box::new(write_half), config.frame.clone());
        let (state, _) = watch::channel(State::Connecting);
        let (outbox, queued) = mpsc::channel(OUTBOX_CAPACITY);

        let remote = Self {
            inner: Arc::new(RemoteInner {
                id,
                peer,
                config,
                state,
                outbox,
                writer_task: Mutex::new(None),
                pending: Arc::new(PendingTable::default()),
                next_id: AtomicI64::new(1),
                shutdown: CancellationToken::new(),
                shared,
                local,
                counters: Counters::default(),
                opened_at: SystemTime::now(),
            }),
        };

        remote.inner.state.send_replace(State::Open);
        info!(remote = %remote.id(), peer = %remote.peer(), "remote open");

        let writer_task = tokio::spawn(remote.clone().write_loop(writer, queued));
        *remote.writer_task() = Some(writer_task);

        let hooks = remote.lifecycle_hooks(HookRegistry::open_hooks);
        remote.run_lifecycle(hooks);
        tokio::spawn(remote.clone().read_loop(reader));
        remote
    }

    /// Send a notification. `null` params are omitted from the envelope.
    pub async fn notify(&self, method: &str, params: impl Serialize) -> Result<()> {
        self.ensure_open()?;
        let envelope = Envelope::Notification {
            method: method.to_string(),
            params: to_params(params)?,
        };
        self.write_envelope(&envelope, Traffic::Notification).await
    }

    /// Send a request using the configured default timeout.
    ///
    /// Returns once the request is on the wire; await the returned
    /// [`PendingCall`] for the response.
    pub async fn request(&self, method: &str, params: impl Serialize) -> Result<PendingCall> {
        self.send_request(method, params, self.inner.config.request_timeout)
            .await
    }

    /// Send a request that fails with [`RpcError::Timeout`] if no response
    /// arrives within `timeout` of sending.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: impl Serialize,
        timeout: Duration,
    ) -> Result<PendingCall> {
        self.send_request(method, params, Some(timeout)).await
    }

    /// Send a request and wait for its result.
    pub async fn call(&self, method: &str, params: impl Serialize) -> Result<Value> {
        self.request(method, params).await?.await
    }

    /// Send a request and deserialize its result.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: impl Serialize,
    ) -> Result<T> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Ask the other side to close, then close this end.
    ///
    /// The connection is closed even when the `TERM` notification could
    /// not be sent; that send error is returned.
    pub async fn terminate(&self, reason: &str) -> Result<()> {
        let sent = self.notify(TERM, json!({ "reason": reason })).await;
        self.close().await;
        sent
    }

    /// Close the connection and wait until it reaches [`State::Closed`].
    pub async fn close(&self) {
        self.begin_close();
        self.closed().await;
    }

    /// Wait until the connection is closed, by either side.
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        // The sender lives in `inner`, so the channel cannot close under us.
        let _ = state.wait_for(|state| *state == State::Closed).await;
    }

    pub fn state(&self) -> State {
        *self.inner.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == State::Open
    }

    pub fn stats(&self) -> RemoteStats {
        self.inner.counters.snapshot()
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Address or label of the other side.
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    /// This connection's own hooks. Consulted after the shared registry.
    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.local
    }

    /// Outgoing requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn opened_at(&self) -> SystemTime {
        self.inner.opened_at
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.inner.config
    }

    /// Stop accepting sends and wake the read loop, which finishes the close.
    fn begin_close(&self) {
        self.inner.state.send_if_modified(|state| match state {
            State::Connecting | State::Open => {
                *state = State::Closing;
                true
            }
            State::Closing | State::Closed => false,
        });
        self.inner.shutdown.cancel();
    }

    fn writer_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .writer_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            State::Open => Ok(()),
            state => Err(RpcError::NotOpen(state)),
        }
    }

    async fn send_request(
        &self,
        method: &str,
        params: impl Serialize,
        timeout: Option<Duration>,
    ) -> Result<PendingCall> {
        self.ensure_open()?;
        let params = to_params(params)?;
        let id = Id::from(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        // Registered before writing so a fast response always finds its entry.
        let rx = self.inner.pending.register(id.clone())?;
        let call = PendingCall::new(id.clone(), rx, timeout, Arc::clone(&self.inner.pending));

        let envelope = Envelope::Request {
            id,
            method: method.to_string(),
            params,
        };
        self.write_envelope(&envelope, Traffic::Request).await?;
        Ok(call)
    }

    /// Queue one envelope and wait for the writer task to put it on the wire.
    ///
    /// Dropping the returned future never cuts a frame short: once queued,
    /// the frame is written whole or the connection closes.
    async fn write_envelope(&self, envelope: &Envelope, traffic: Traffic) -> Result<()> {
        let bytes = envelope.encode()?;
        let (done, outcome) = oneshot::channel();
        self.inner
            .outbox
            .send(Outgoing {
                bytes,
                traffic,
                done,
            })
            .await
            .map_err(|_| RpcError::ConnectionClosed)?;
        let written = outcome.await.map_err(|_| RpcError::ConnectionClosed)??;

        debug!(
            remote = %self.id(),
            kind = ?traffic,
            method = envelope.method().unwrap_or_default(),
            id = ?envelope.id(),
            size = written,
            "sent"
        );
        Ok(())
    }

    async fn write_loop(
        self,
        mut writer: FrameWriter<BoxWriter>,
        mut queued: mpsc::Receiver<Outgoing>,
    ) {
        let shutdown = &self.inner.shutdown;
        loop {
            let outgoing = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                outgoing = queued.recv() => match outgoing {
                    Some(outgoing) => outgoing,
                    None => break,
                },
            };
            let sent = tokio::select! {
                biased;
                _ = shutdown.cancelled() => Err(FrameError::ConnectionClosed),
                sent = writer.send(&outgoing.bytes) => sent,
            };

            let failed = match &sent {
                Ok(written) => {
                    self.inner.counters.sent(outgoing.traffic, *written);
                    false
                }
                // Rejected by the encoder; nothing reached the stream.
                Err(FrameError::FrameTooLarge { .. } | FrameError::DelimiterInPayload) => false,
                Err(err) => {
                    if !shutdown.is_cancelled() {
                        warn!(remote = %self.id(), error = %err, "write failed, closing");
                    }
                    true
                }
            };
            let _ = outgoing.done.send(sent);
            if failed {
                self.begin_close();
                break;
            }
        }

        // Queued senders see their slot dropped and report ConnectionClosed.
        drop(queued);
        if let Err(err) = writer.shutdown().await {
            debug!(remote = %self.id(), error = %err, "write shutdown failed");
        }
    }

    async fn read_loop<R>(self, mut reader: FrameReader<R>)
    where
        R: AsyncRead + Unpin,
    {
        let mut oversized = 0usize;
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => break,
                frame = reader.read_frame() => frame,
            };
            match frame {
                Ok(frame) => self.handle_frame(&frame.payload),
                Err(FrameError::FrameTooLarge { size, max }) => {
                    oversized += 1;
                    warn!(remote = %self.id(), size, max, "dropped oversized frame");
                    if let Some(limit) = self.inner.config.max_frame_errors {
                        if oversized > limit {
                            warn!(remote = %self.id(), limit, "too many oversized frames, closing");
                            break;
                        }
                    }
                }
                Err(FrameError::ConnectionClosed) => {
                    debug!(remote = %self.id(), "end of input");
                    break;
                }
                Err(err) => {
                    warn!(remote = %self.id(), error = %err, "read failed");
                    break;
                }
            }
        }

        self.inner.state.send_if_modified(|state| {
            if *state == State::Open {
                *state = State::Closing;
                true
            } else {
                false
            }
        });

        loop {
            match reader.next_buffered() {
                Ok(Some(frame)) => self.handle_frame(&frame.payload),
                Ok(None) => break,
                Err(FrameError::FrameTooLarge { .. }) => continue,
                Err(err) => {
                    debug!(remote = %self.id(), error = %err, "discarding unreadable tail");
                    break;
                }
            }
        }

        self.finish_close().await;
    }

    async fn finish_close(&self) {
        self.inner.shutdown.cancel();
        let failed = self.inner.pending.close_all();

        let writer_task = self.writer_task().take();
        if let Some(task) = writer_task {
            if let Err(err) = task.await {
                debug!(remote = %self.id(), error = %err, "writer task ended abnormally");
            }
        }

        self.inner.state.send_replace(State::Closed);
        info!(
            remote = %self.id(),
            peer = %self.peer(),
            failed_requests = failed,
            "remote closed"
        );

        let hooks = self.lifecycle_hooks(HookRegistry::close_hooks);
        self.run_lifecycle(hooks);
    }

    fn handle_frame(&self, payload: &[u8]) {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        self.inner
            .counters
            .received_bytes(payload.len() + self.inner.config.frame.delimiter.len());

        for message in Inbound::decode(payload).into_messages() {
            match message {
                Ok(envelope) => self.dispatch(envelope),
                Err(malformed) => self.reject(malformed),
            }
        }
    }

    fn reject(&self, malformed: Malformed) {
        warn!(
            remote = %self.id(),
            kind = %malformed.kind,
            id = ?malformed.id,
            detail = %malformed.detail,
            "malformed message"
        );
        if let Some(Envelope::Failure { id: Some(id), error }) = malformed.response() {
            self.spawn_response(id, Err(error));
        }
    }

    fn dispatch(&self, envelope: Envelope) {
        match envelope {
            Envelope::Success { id, result } => self.resolve(id, Ok(result)),
            Envelope::Failure {
                id: Some(id),
                error,
            } => self.resolve(id, Err(RpcError::Remote(error))),
            Envelope::Failure { id: None, error } => {
                self.inner.counters.received(Traffic::Response);
                warn!(
                    remote = %self.id(),
                    code = error.code,
                    message = %error.message,
                    "peer reported an error without id"
                );
            }
            Envelope::Request { id, method, params } => {
                self.inner.counters.received(Traffic::Request);
                self.dispatch_request(id, method, params);
            }
            Envelope::Notification { method, params } => {
                self.inner.counters.received(Traffic::Notification);
                self.dispatch_notification(method, params);
            }
        }
    }

    fn resolve(&self, id: Id, outcome: Result<Value>) {
        self.inner.counters.received(Traffic::Response);
        if !self.inner.pending.resolve(&id, outcome) {
            debug!(remote = %self.id(), id = %id, "dropping response for unknown id");
        }
    }

    fn dispatch_request(&self, id: Id, method: String, params: Option<Value>) {
        debug!(remote = %self.id(), id = %id, method = %method, "request");
        let Some(hook) = self.request_hook(&method) else {
            debug!(remote = %self.id(), method = %method, "no hook for request");
            self.spawn_response(id, Err(ErrorObject::method_not_found(&method)));
            return;
        };

        #[cfg(feature = "schema")]
        if let Err(error) = self.check_params(&method, params.as_ref()) {
            self.spawn_response(id, Err(error));
            return;
        }

        let remote = self.clone();
        tokio::spawn(async move {
            let hook_remote = remote.clone();
            let invocation = AssertUnwindSafe(async move { hook(hook_remote, params).await });
            let outcome = match invocation.catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(remote = %remote.id(), method = %method, panic = %message, "request hook panicked");
                    Err(ErrorObject::internal_error(message))
                }
            };
            remote.send_response(id, outcome).await;
        });
    }

    fn dispatch_notification(&self, method: String, params: Option<Value>) {
        debug!(remote = %self.id(), method = %method, "notification");
        let Some(hook) = self.notification_hook(&method) else {
            debug!(remote = %self.id(), method = %method, "no hook for notification, dropped");
            return;
        };

        #[cfg(feature = "schema")]
        if let Err(error) = self.check_params(&method, params.as_ref()) {
            warn!(
                remote = %self.id(),
                method = %method,
                error = %error,
                "notification params rejected"
            );
            return;
        }

        let remote = self.clone();
        tokio::spawn(async move {
            let hook_remote = remote.clone();
            let invocation = AssertUnwindSafe(async move { hook(hook_remote, params).await });
            match invocation.catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(remote = %remote.id(), method = %method, error = %error, "notification hook failed");
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(remote = %remote.id(), method = %method, panic = %message, "notification hook panicked");
                }
            }
        });
    }

    #[cfg(feature = "schema")]
    fn check_params(
        &self,
        method: &str,
        params: Option<&Value>,
    ) -> std::result::Result<(), ErrorObject> {
        let Some(registry) = self.inner.config.schema.as_ref() else {
            return Ok(());
        };
        registry
            .validate(method, params.unwrap_or(&Value::Null))
            .map_err(|err| ErrorObject::invalid_params(err.to_string()))
    }

    fn request_hook(&self, method: &str) -> Option<RequestHook> {
        self.inner
            .shared
            .request_hook(method)
            .or_else(|| self.inner.local.request_hook(method))
    }

    fn notification_hook(&self, method: &str) -> Option<NotificationHook> {
        self.inner
            .shared
            .notification_hook(method)
            .or_else(|| self.inner.local.notification_hook(method))
    }

    fn spawn_response(&self, id: Id, outcome: HookResult) {
        let remote = self.clone();
        tokio::spawn(async move { remote.send_response(id, outcome).await });
    }

    async fn send_response(&self, id: Id, outcome: HookResult) {
        let envelope = match outcome {
            Ok(result) => Envelope::Success {
                id: id.clone(),
                result,
            },
            Err(error) => Envelope::Failure {
                id: Some(id.clone()),
                error,
            },
        };
        if let Err(err) = self.write_envelope(&envelope, Traffic::Response).await {
            warn!(remote = %self.id(), id = %id, error = %err, "failed to send response");
        }
    }

    fn lifecycle_hooks(&self, select: fn(&HookRegistry) -> Vec<LifecycleHook>) -> Vec<LifecycleHook> {
        let mut hooks = select(&self.inner.shared);
        hooks.extend(select(&self.inner.local));
        hooks
    }

    fn run_lifecycle(&self, hooks: Vec<LifecycleHook>) {
        for hook in hooks {
            let remote = self.clone();
            tokio::spawn(async move {
                let id = remote.id().to_string();
                let invocation = AssertUnwindSafe(async move { hook(remote).await });
                if let Err(panic) = invocation.catch_unwind().await {
                    warn!(remote = %id, panic = %panic_message(panic.as_ref()), "lifecycle hook panicked");
                }
            });
        }
    }
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

fn install_builtins(local: &HookRegistry) {
    local.on_request(PING, |_, params| async move { Ok(params.unwrap_or(Value::Null)) });
    local.on_notification(TERM, |remote, params| async move {
        let reason = params
            .as_ref()
            .and_then(|params| params.get("reason"))
            .and_then(Value::as_str)
            .unwrap_or("unspecified")
            .to_string();
        info!(remote = %remote.id(), reason = %reason, "peer requested termination");
        remote.close().await;
        Ok(())
    });
}

fn to_params(params: impl Serialize) -> Result<Option<Value>> {
    match serde_json::to_value(params)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "hook panicked".to_string()
    }
}
