//! Minimal echo server on a Unix domain socket (TCP elsewhere).
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- call unix:/tmp/ezrpc-echo-<pid>/echo.sock \
//!     echo --params '{"hello":"world"}'

use std::fs;
use std::sync::Arc;

use ezrpc::{Endpoint, HookRegistry, Listener, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("ezrpc-echo-{}", std::process::id()));
    fs::create_dir_all(&sock_dir)?;

    let endpoint = if cfg!(unix) {
        Endpoint::unix(sock_dir.join("echo.sock"))
    } else {
        Endpoint::tcp("127.0.0.1:7000")
    };

    let hooks = HookRegistry::new();
    hooks.on_request("echo", |remote, params| async move {
        eprintln!("{} asked for an echo", remote.id());
        Ok(params.unwrap_or_default())
    });
    hooks.on_open(|remote| async move { eprintln!("{} connected from {}", remote.id(), remote.peer()) });
    hooks.on_close(|remote| async move { eprintln!("{} disconnected", remote.id()) });

    let listener = Listener::bind(&endpoint).await?;
    eprintln!("Listening on {}", listener.local_endpoint()?);

    let server = Server::new(Arc::new(hooks));
    tokio::select! {
        _ = server.serve(listener) => {}
        _ = tokio::signal::ctrl_c() => server.shutdown("example stopping").await,
    }

    let _ = fs::remove_dir_all(&sock_dir);
    Ok(())
}
