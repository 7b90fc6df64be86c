//! Both sides call each other over one TCP connection.
//!
//! The server asks every new client for its name before answering its
//! `greet` request; the client answers `whoami` and prints `news`
//! notifications broadcast by the server.
//!
//! Run with:
//!   cargo run --example bidirectional

use std::sync::Arc;
use std::time::Duration;

use ezrpc::{Client, Endpoint, ErrorObject, HookRegistry, Listener, RemoteConfig, Server};
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server_hooks = HookRegistry::new();
    server_hooks.on_request("greet", |remote, _| async move {
        let name: String = remote
            .call_as("whoami", ())
            .await
            .map_err(|err| ErrorObject::internal_error(err.to_string()))?;
        Ok(json!(format!("hello, {name}")))
    });

    let listener = Listener::bind(&Endpoint::tcp("127.0.0.1:0")).await?;
    let endpoint = listener.local_endpoint()?;
    let server = Server::new(Arc::new(server_hooks));
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve(listener).await }
    });

    let client_hooks = HookRegistry::new();
    client_hooks.on_request("whoami", |_, _| async move { Ok(json!("example-client")) });
    client_hooks.on_notification("news", |_, params| async move {
        println!("news: {}", params.unwrap_or(Value::Null));
        Ok(())
    });

    let config = RemoteConfig::default().with_request_timeout(Some(Duration::from_secs(5)));
    let client = Client::connect(&endpoint, Arc::new(client_hooks), config).await?;

    let greeting = client.remote().call("greet", ()).await?;
    println!("server said: {greeting}");

    let delivered = server
        .broadcast_notification("news", json!({ "headline": "ezrpc works both ways" }))
        .await?;
    println!("broadcast delivered to {delivered} client(s)");

    // Give the notification a moment to arrive before shutting down.
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.shutdown("example finished").await;
    client.remote().closed().await;
    serving.await?;

    println!("client stats: {:?}", client.remote().stats());
    Ok(())
}
