use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ezrpc_transport::Listener;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::hooks::HookRegistry;
use crate::remote::{Remote, RemoteConfig, State, ETC_INIT};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

struct ServerInner {
    hooks: Arc<HookRegistry>,
    config: RemoteConfig,
    remotes: Mutex<HashMap<String, Remote>>,
    next_client: AtomicU64,
    startup: u64,
    shutdown: CancellationToken,
}

/// Accepts connections and keeps the set of live Remotes.
///
/// Every accepted connection shares the server's hook registry. Closed
/// connections leave the set on their own.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn new(hooks: Arc<HookRegistry>) -> Self {
        Self::with_config(hooks, RemoteConfig::default())
    }

    pub fn with_config(hooks: Arc<HookRegistry>, config: RemoteConfig) -> Self {
        let startup = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        Self {
            inner: Arc::new(ServerInner {
                hooks,
                config,
                remotes: Mutex::new(HashMap::new()),
                next_client: AtomicU64::new(1),
                startup,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn remotes_lock(&self) -> MutexGuard<'_, HashMap<String, Remote>> {
        self.inner
            .remotes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Accept connections until [`shutdown`](Self::shutdown) is called.
    ///
    /// Accept failures are logged and retried after a short pause.
    pub async fn serve(&self, listener: Listener) {
        match listener.local_endpoint() {
            Ok(endpoint) => info!(endpoint = %endpoint, "serving"),
            Err(err) => info!(transport = listener.transport_name(), error = %err, "serving"),
        }

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok(stream) => {
                    if let Some((uid, gid, pid)) = stream.peer_credentials() {
                        debug!(peer = stream.peer(), uid, gid, pid = ?pid, "peer credentials");
                    }
                    let peer = stream.peer().to_string();
                    self.adopt(stream, peer);
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
        info!("accept loop stopped");
    }

    /// Wrap an already-connected stream into a Remote owned by this server.
    pub fn adopt<S>(&self, stream: S, peer: impl Into<String>) -> Remote
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = format!(
            "client-{}",
            self.inner.next_client.fetch_add(1, Ordering::Relaxed)
        );

        let local = HookRegistry::new();
        if self.inner.config.builtin_hooks {
            let startup = self.inner.startup;
            local.on_request(ETC_INIT, move |remote, _| async move {
                Ok(json!({ "id": remote.id(), "startup": startup }))
            });
        }
        let server: Weak<ServerInner> = Arc::downgrade(&self.inner);
        local.on_close(move |remote| {
            let server = server.clone();
            async move {
                if let Some(server) = server.upgrade() {
                    Server { inner: server }.forget(remote.id());
                }
            }
        });

        let remote = Remote::spawn_with_local(
            stream,
            id.clone(),
            peer.into(),
            Arc::clone(&self.inner.hooks),
            local,
            self.inner.config.clone(),
        );
        self.remotes_lock().insert(id.clone(), remote.clone());
        // Closed before it was tracked: its close hook may have already run.
        if remote.state() == State::Closed {
            self.forget(&id);
        }
        remote
    }

    fn forget(&self, id: &str) {
        if self.remotes_lock().remove(id).is_some() {
            debug!(remote = %id, "remote removed");
        }
    }

    /// Live Remotes, ordered by id.
    pub fn remotes(&self) -> Vec<Remote> {
        let mut remotes: Vec<Remote> = self.remotes_lock().values().cloned().collect();
        remotes.sort_by(|a, b| a.id().cmp(b.id()));
        remotes
    }

    pub fn remote(&self, id: &str) -> Option<Remote> {
        self.remotes_lock().get(id).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.remotes_lock().len()
    }

    /// Send a notification to every live Remote. Returns how many sends
    /// succeeded.
    pub async fn broadcast_notification(&self, method: &str, params: impl Serialize) -> Result<usize> {
        let params = serde_json::to_value(params)?;
        let remotes = self.remotes();
        let outcomes = join_all(
            remotes
                .iter()
                .map(|remote| remote.notify(method, params.clone())),
        )
        .await;
        Ok(outcomes.iter().filter(|outcome| outcome.is_ok()).count())
    }

    /// Send a request to every live Remote and collect each outcome by
    /// remote id.
    pub async fn broadcast_request(
        &self,
        method: &str,
        params: impl Serialize,
    ) -> Result<Vec<(String, Result<Value>)>> {
        let params = serde_json::to_value(params)?;
        let remotes = self.remotes();
        let outcomes = join_all(remotes.iter().map(|remote| {
            let params = params.clone();
            async move { (remote.id().to_string(), remote.call(method, params).await) }
        }))
        .await;
        Ok(outcomes)
    }

    /// Stop accepting and terminate every live Remote with `reason`.
    pub async fn shutdown(&self, reason: &str) {
        self.inner.shutdown.cancel();
        let remotes = self.remotes();
        info!(connections = remotes.len(), reason, "server shutting down");
        join_all(remotes.iter().map(|remote| async move {
            if let Err(err) = remote.terminate(reason).await {
                debug!(remote = %remote.id(), error = %err, "terminate notice not sent");
            }
        }))
        .await;
    }

    /// Server start time, in seconds since the Unix epoch.
    pub fn startup(&self) -> u64 {
        self.inner.startup
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.inner.hooks
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("connections", &self.connection_count())
            .field("startup", &self.inner.startup)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;

    use ezrpc_transport::Endpoint;
    use tokio::sync::mpsc;

    use super::*;
    use crate::client::Client;
    use crate::remote::TERM;

    async fn within<F: Future>(fut: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(5), fut)
            .await
            .expect("operation should finish in time")
    }

    async fn wait_for_count(server: &Server, expected: usize) {
        within(async {
            while server.connection_count() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
    }

    fn server_hooks() -> Arc<HookRegistry> {
        let hooks = HookRegistry::new();
        hooks.on_request("echo", |_, params| async move { Ok(params.unwrap_or(Value::Null)) });
        Arc::new(hooks)
    }

    fn connect_in_memory(server: &Server, client_hooks: Arc<HookRegistry>) -> (Remote, Client) {
        let (server_side, client_side) = tokio::io::duplex(64 * 1024);
        let remote = server.adopt(server_side, "mem");
        let client = Client::from_stream(client_side, "mem", client_hooks, RemoteConfig::default());
        (remote, client)
    }

    #[tokio::test]
    async fn adopted_remotes_get_sequential_ids() {
        let server = Server::new(server_hooks());
        let (first, _c1) = connect_in_memory(&server, Arc::new(HookRegistry::new()));
        let (second, _c2) = connect_in_memory(&server, Arc::new(HookRegistry::new()));

        assert_eq!(first.id(), "client-1");
        assert_eq!(second.id(), "client-2");
        assert_eq!(server.connection_count(), 2);
        let ids: Vec<String> = server.remotes().iter().map(|r| r.id().to_string()).collect();
        assert_eq!(ids, vec!["client-1", "client-2"]);
        assert!(server.remote("client-2").is_some());
    }

    #[tokio::test]
    async fn etc_init_reports_id_and_startup() {
        let server = Server::new(server_hooks());
        let (_remote, client) = connect_in_memory(&server, Arc::new(HookRegistry::new()));

        let info = within(client.remote().call(ETC_INIT, ())).await.unwrap();
        assert_eq!(info, json!({"id": "client-1", "startup": server.startup()}));
        assert_eq!(client.remote().id(), "server");
    }

    #[tokio::test]
    async fn broadcast_notification_reaches_every_client() {
        let server = Server::new(server_hooks());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client_hooks = HookRegistry::new();
        client_hooks.on_notification("news", move |_, params| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(params);
                Ok(())
            }
        });
        let client_hooks = Arc::new(client_hooks);
        let (_r1, _c1) = connect_in_memory(&server, Arc::clone(&client_hooks));
        let (_r2, _c2) = connect_in_memory(&server, Arc::clone(&client_hooks));

        let sent = server.broadcast_notification("news", json!({"n": 1})).await.unwrap();
        assert_eq!(sent, 2);
        for _ in 0..2 {
            let params = within(rx.recv()).await.expect("client should be notified");
            assert_eq!(params, Some(json!({"n": 1})));
        }
    }

    #[tokio::test]
    async fn broadcast_request_collects_each_answer() {
        let server = Server::new(server_hooks());
        let client_hooks = HookRegistry::new();
        client_hooks.on_request("name", |remote, _| async move {
            Ok(json!(format!("answered by {}", remote.peer())))
        });
        let client_hooks = Arc::new(client_hooks);
        let (left, right) = tokio::io::duplex(4096);
        server.adopt(left, "one");
        let _c1 = Client::from_stream(right, "alpha", Arc::clone(&client_hooks), RemoteConfig::default());
        let (left, right) = tokio::io::duplex(4096);
        server.adopt(left, "two");
        let _c2 = Client::from_stream(right, "beta", Arc::clone(&client_hooks), RemoteConfig::default());

        let answers = within(server.broadcast_request("name", ())).await.unwrap();
        let answers: Vec<(String, Value)> = answers
            .into_iter()
            .map(|(id, result)| (id, result.expect("client should answer")))
            .collect();
        assert_eq!(
            answers,
            vec![
                ("client-1".to_string(), json!("answered by alpha")),
                ("client-2".to_string(), json!("answered by beta")),
            ]
        );
    }

    #[tokio::test]
    async fn closed_remotes_leave_the_set() {
        let server = Server::new(server_hooks());
        let (_r1, c1) = connect_in_memory(&server, Arc::new(HookRegistry::new()));
        let (_r2, _c2) = connect_in_memory(&server, Arc::new(HookRegistry::new()));
        assert_eq!(server.connection_count(), 2);

        within(c1.remote().close()).await;
        wait_for_count(&server, 1).await;
        assert!(server.remote("client-1").is_none());
        assert!(server.remote("client-2").is_some());
    }

    #[tokio::test]
    async fn shutdown_terminates_clients() {
        let server = Server::new(server_hooks());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client_hooks = HookRegistry::new();
        client_hooks.on_notification(TERM, move |_, params| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(params);
                Ok(())
            }
        });
        let (_remote, client) = connect_in_memory(&server, Arc::new(client_hooks));

        within(server.shutdown("maintenance")).await;
        let params = within(rx.recv()).await.expect("client should see TERM");
        assert_eq!(params, Some(json!({"reason": "maintenance"})));
        // The custom TERM hook does not close; end of input does.
        within(client.remote().closed()).await;
        wait_for_count(&server, 0).await;
    }

    #[tokio::test]
    async fn serves_tcp_until_shutdown() {
        let listener = Listener::bind(&Endpoint::tcp("127.0.0.1:0"))
            .await
            .expect("listener should bind");
        let endpoint = listener.local_endpoint().expect("listener should report its address");

        let server = Server::new(server_hooks());
        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve(listener).await }
        });

        let client = Client::connect(&endpoint, Arc::new(HookRegistry::new()), RemoteConfig::default())
            .await
            .expect("client should connect");
        let result = within(client.remote().call("echo", json!([1, "two"]))).await.unwrap();
        assert_eq!(result, json!([1, "two"]));
        wait_for_count(&server, 1).await;

        within(server.shutdown("done")).await;
        within(serving).await.expect("accept loop should stop cleanly");
        within(client.remote().closed()).await;
    }
}
