use serde::Serialize;

use crate::cmd::{connect_client, parse_endpoint, parse_params, parse_timeout, NotifyArgs};
use crate::exit::{rpc_error, CliResult, SUCCESS};
use crate::output::{print_fields, OutputFormat};

#[derive(Serialize)]
struct NotifyOutput<'a> {
    method: &'a str,
    endpoint: String,
    sent: bool,
    bytes: u64,
}

pub async fn run(args: NotifyArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = parse_endpoint(&args.endpoint)?;
    let params = parse_params(args.params.as_deref())?;
    let timeout = parse_timeout(&args.timeout)?;

    let client = connect_client(&endpoint, timeout).await?;
    let remote = client.remote();
    let sent = remote.notify(&args.method, params).await;
    let bytes = remote.stats().bytes_sent;
    remote.close().await;
    sent.map_err(|err| rpc_error("notify failed", err))?;

    print_fields(
        &NotifyOutput {
            method: &args.method,
            endpoint: endpoint.to_string(),
            sent: true,
            bytes,
        },
        format,
    );
    Ok(SUCCESS)
}
