use std::time::Instant;

use ezrpc::remote::{ETC_INIT, PING};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cmd::{connect_client, parse_endpoint, parse_timeout, InfoArgs};
use crate::exit::{rpc_error, CliResult, SUCCESS};
use crate::output::{print_fields, OutputFormat};

#[derive(Deserialize)]
struct InitReply {
    id: String,
    startup: u64,
}

#[derive(Serialize)]
struct InfoOutput {
    endpoint: String,
    transport: &'static str,
    peer: String,
    remote_id: Option<String>,
    server_startup: Option<u64>,
    ping_latency_ms: Option<f64>,
    connected: bool,
}

pub async fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = parse_endpoint(&args.endpoint)?;
    let timeout = parse_timeout(&args.timeout)?;

    let client = connect_client(&endpoint, timeout).await?;
    let remote = client.remote();

    let start = Instant::now();
    let ping = remote.call(PING, json!({ "probe": true })).await;
    let ping_latency_ms = ping
        .as_ref()
        .ok()
        .map(|_| (start.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0);
    if let Err(err) = &ping {
        tracing::debug!(error = %err, "ping failed");
    }

    // Servers with built-ins disabled do not answer ETC.INIT.
    let init = remote.call_as::<InitReply>(ETC_INIT, ()).await.ok();

    let out = InfoOutput {
        endpoint: endpoint.to_string(),
        transport: endpoint.transport_name(),
        peer: remote.peer().to_string(),
        remote_id: init.as_ref().map(|init| init.id.clone()),
        server_startup: init.as_ref().map(|init| init.startup),
        ping_latency_ms,
        connected: true,
    };
    remote.close().await;

    if ping_latency_ms.is_none() && out.remote_id.is_none() {
        if let Err(err) = ping {
            return Err(rpc_error("probe failed", err));
        }
    }

    print_fields(&out, format);
    Ok(SUCCESS)
}
