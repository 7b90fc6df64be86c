use std::time::Instant;

use ezrpc::remote::RpcError;

use crate::cmd::{connect_client, parse_endpoint, parse_params, parse_timeout, CallArgs};
use crate::exit::{rpc_error, CliResult, SUCCESS};
use crate::output::{print_json, print_result, OutputFormat};

pub async fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = parse_endpoint(&args.endpoint)?;
    let params = parse_params(args.params.as_deref())?;
    let timeout = parse_timeout(&args.timeout)?;

    let client = connect_client(&endpoint, timeout).await?;
    let remote = client.remote();

    let start = Instant::now();
    let outcome = remote.call(&args.method, params).await;
    let elapsed_ms = (start.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0;
    remote.close().await;

    match outcome {
        Ok(result) => {
            print_result(&args.method, &endpoint.to_string(), elapsed_ms, &result, format);
            Ok(SUCCESS)
        }
        Err(RpcError::Remote(error)) => {
            // The error object is the answer; print it before failing.
            if matches!(format, OutputFormat::Json) {
                print_json(&serde_json::json!({ "method": args.method, "error": error }));
            }
            Err(rpc_error("call failed", RpcError::Remote(error)))
        }
        Err(err) => Err(rpc_error("call failed", err)),
    }
}
