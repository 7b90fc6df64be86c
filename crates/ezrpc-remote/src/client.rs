use std::sync::Arc;

use ezrpc_transport::Endpoint;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::hooks::HookRegistry;
use crate::remote::{Remote, RemoteConfig};

/// Id of the Remote a client holds.
pub const SERVER_REMOTE_ID: &str = "server";

/// One outbound connection.
#[derive(Debug, Clone)]
pub struct Client {
    remote: Remote,
    hooks: Arc<HookRegistry>,
}

impl Client {
    /// Connect to `endpoint`; the server may call back into `hooks`.
    pub async fn connect(
        endpoint: &Endpoint,
        hooks: Arc<HookRegistry>,
        config: RemoteConfig,
    ) -> Result<Self> {
        let stream = ezrpc_transport::connect(endpoint).await?;
        let peer = stream.peer().to_string();
        Ok(Self::from_stream(stream, peer, hooks, config))
    }

    /// Use an already-connected stream.
    pub fn from_stream<S>(
        stream: S,
        peer: impl Into<String>,
        hooks: Arc<HookRegistry>,
        config: RemoteConfig,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let remote = Remote::spawn(stream, SERVER_REMOTE_ID, peer, Arc::clone(&hooks), config);
        Self { remote, hooks }
    }

    pub fn remote(&self) -> &Remote {
        &self.remote
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn into_remote(self) -> Remote {
        self.remote
    }
}
