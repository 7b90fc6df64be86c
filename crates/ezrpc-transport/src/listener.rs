#[cfg(unix)]
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
#[cfg(unix)]
use std::path::{Path, PathBuf};

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::RpcStream;

/// Options applied when binding a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Permission bits set on a created Unix socket path.
    pub socket_mode: u32,
}

impl ListenerConfig {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    pub fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = mode;
        self
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            socket_mode: Self::DEFAULT_SOCKET_MODE,
        }
    }
}

/// A bound listener for any supported [`Endpoint`].
///
/// Unix socket files created by `bind` are removed on drop, unless the path
/// has since been replaced by something else.
#[derive(Debug)]
pub struct Listener {
    inner: ListenerInner,
}

#[derive(Debug)]
enum ListenerInner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixSocketGuard),
}

impl Listener {
    /// Bind with default options.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        Self::bind_with_config(endpoint, &ListenerConfig::default()).await
    }

    /// Bind with explicit options.
    pub async fn bind_with_config(endpoint: &Endpoint, config: &ListenerConfig) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr.as_str()).await.map_err(|source| {
                    TransportError::Bind {
                        endpoint: endpoint.to_string(),
                        source,
                    }
                })?;
                let local = listener
                    .local_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| addr.clone());
                info!(addr = %local, "listening on tcp");
                Ok(Self {
                    inner: ListenerInner::Tcp(listener),
                })
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Self {
                inner: ListenerInner::Unix(UnixSocketGuard::bind(path, config.socket_mode)?),
            }),
            #[cfg(not(unix))]
            Endpoint::Unix(_) => {
                let _ = config;
                Err(TransportError::Unsupported(endpoint.to_string()))
            }
        }
    }

    /// Wait for the next incoming connection.
    pub async fn accept(&self) -> Result<RpcStream> {
        match &self.inner {
            ListenerInner::Tcp(listener) => {
                let (stream, addr) = listener.accept().await.map_err(TransportError::Accept)?;
                debug!(peer = %addr, "accepted tcp connection");
                Ok(RpcStream::from_tcp(stream))
            }
            #[cfg(unix)]
            ListenerInner::Unix(guard) => {
                let (stream, _addr) = guard
                    .listener
                    .accept()
                    .await
                    .map_err(TransportError::Accept)?;
                debug!(path = ?guard.path, "accepted unix connection");
                Ok(RpcStream::from_unix(
                    stream,
                    format!("unix:{}", guard.path.display()),
                ))
            }
        }
    }

    /// The endpoint actually bound. For TCP port 0 this carries the assigned port.
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        match &self.inner {
            ListenerInner::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?.to_string())),
            #[cfg(unix)]
            ListenerInner::Unix(guard) => Ok(Endpoint::Unix(guard.path.clone())),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            ListenerInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            ListenerInner::Unix(_) => "unix-domain-socket",
        }
    }
}

/// Connect to a listening endpoint.
pub async fn connect(endpoint: &Endpoint) -> Result<RpcStream> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream =
                TcpStream::connect(addr.as_str())
                    .await
                    .map_err(|source| TransportError::Connect {
                        endpoint: endpoint.to_string(),
                        source,
                    })?;
            debug!(%addr, "connected over tcp");
            Ok(RpcStream::from_tcp(stream))
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path)
                .await
                .map_err(|source| TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
            debug!(?path, "connected to unix domain socket");
            Ok(RpcStream::from_unix(stream, endpoint.to_string()))
        }
        #[cfg(not(unix))]
        Endpoint::Unix(_) => Err(TransportError::Unsupported(endpoint.to_string())),
    }
}

#[cfg(unix)]
#[derive(Debug)]
struct UnixSocketGuard {
    listener: tokio::net::UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

#[cfg(unix)]
impl UnixSocketGuard {
    /// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS and the BSDs.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    fn bind(path: &Path, mode: u32) -> Result<Self> {
        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path: path.to_path_buf(),
                len,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |source: std::io::Error| TransportError::Bind {
            endpoint: format!("unix:{}", path.display()),
            source,
        };

        // Stale sockets are removed; anything else at the path is left alone.
        if let Ok(metadata) = std::fs::symlink_metadata(path) {
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(path).map_err(bind_err)?;
            } else {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
        }

        let listener = tokio::net::UnixListener::bind(path).map_err(bind_err)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(path).map_err(bind_err)?;

        info!(?path, mode = %format!("{mode:o}"), "listening on unix domain socket");

        Ok(Self {
            listener,
            created_inode: Some((created.dev(), created.ino())),
            path: path.to_path_buf(),
        })
    }
}

#[cfg(unix)]
impl Drop for UnixSocketGuard {
    fn drop(&mut self) {
        let Some((dev, ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket() && metadata.dev() == dev && metadata.ino() == ino {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("ezrpc-{tag}-{}-{nanos}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn tcp_bind_accept_connect() {
        let listener = Listener::bind(&Endpoint::tcp("127.0.0.1:0")).await.unwrap();
        let endpoint = listener.local_endpoint().unwrap();
        assert_eq!(listener.transport_name(), "tcp");
        assert!(!endpoint.to_string().ends_with(":0"));

        let client = tokio::spawn(async move {
            let mut stream = connect(&endpoint).await.unwrap();
            stream.write_all(b"hello").await.unwrap();
            stream.flush().await.unwrap();
        });

        let mut server = listener.accept().await.unwrap();
        assert!(server.peer_credentials().is_none());
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused_maps_to_connect_error() {
        let listener = Listener::bind(&Endpoint::tcp("127.0.0.1:0")).await.unwrap();
        let endpoint = listener.local_endpoint().unwrap();
        drop(listener);

        let result = connect(&endpoint).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_bind_accept_connect_and_cleanup() {
        let dir = temp_dir("uds");
        let sock_path = dir.join("test.sock");
        let endpoint = Endpoint::unix(&sock_path);

        let listener = Listener::bind(&endpoint).await.unwrap();
        assert!(sock_path.exists());
        assert_eq!(listener.local_endpoint().unwrap(), endpoint);

        let client_endpoint = endpoint.clone();
        let client = tokio::spawn(async move {
            let mut stream = connect(&client_endpoint).await.unwrap();
            stream.write_all(b"hello").await.unwrap();
        });

        let mut server = listener.accept().await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        let (uid, _gid, _pid) = server.peer_credentials().unwrap();
        assert_eq!(uid, std::fs::metadata(&dir).unwrap().uid());
        client.await.unwrap();

        drop(listener);
        assert!(!sock_path.exists(), "socket file should be cleaned up on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = Listener::bind(&Endpoint::unix(long_path)).await;
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_default_permissions_hardened() {
        let dir = temp_dir("perms");
        let sock_path = dir.join("perm.sock");

        let listener = Listener::bind(&Endpoint::unix(&sock_path)).await.unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_bind_replaces_stale_socket() {
        let dir = temp_dir("stale");
        let sock_path = dir.join("stale.sock");
        let stale = std::os::unix::net::UnixListener::bind(&sock_path).unwrap();
        drop(stale);
        assert!(sock_path.exists());

        let listener = Listener::bind(&Endpoint::unix(&sock_path)).await.unwrap();
        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_bind_rejects_existing_non_socket_file() {
        let dir = temp_dir("bind-file");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = Listener::bind(&Endpoint::unix(&sock_path)).await;
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        assert!(sock_path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_drop_does_not_remove_replaced_path() {
        let dir = temp_dir("drop-race");
        let sock_path = dir.join("drop.sock");

        let listener = Listener::bind(&Endpoint::unix(&sock_path)).await.unwrap();
        std::fs::remove_file(&sock_path).unwrap();
        std::fs::write(&sock_path, b"replacement-file").unwrap();

        drop(listener);
        assert!(
            sock_path.exists(),
            "drop must not remove path if inode identity changed"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }
}
