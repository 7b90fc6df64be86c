use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Subcommand};
use ezrpc::remote::{Client, HookRegistry, RemoteConfig, RpcError};
use ezrpc::transport::{Endpoint, TransportError};
use serde_json::Value;

use crate::exit::{rpc_error, CliError, CliResult, DATA_INVALID, TIMEOUT, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod info;
pub mod notify;
pub mod serve;
pub mod version;

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the demo hooks (echo, sum, log) on an endpoint.
    Serve(ServeArgs),
    /// Call a method and print its result.
    Call(CallArgs),
    /// Send a notification.
    Notify(NotifyArgs),
    /// Probe a server and print connection metadata.
    Info(InfoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format).await,
        Command::Call(args) => call::run(args, format).await,
        Command::Notify(args) => notify::run(args, format).await,
        Command::Info(args) => info::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Endpoint to listen on (`host:port`, `tcp://host:port`, `unix:/path`).
    pub endpoint: String,
    /// Schema directory for params validation (`<method>.schema.json`).
    #[arg(long, value_name = "DIR")]
    pub validate: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Endpoint to connect to.
    pub endpoint: String,
    /// Method name.
    pub method: String,
    /// JSON params.
    #[arg(long)]
    pub params: Option<String>,
    /// Maximum time to wait for the connection and the response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct NotifyArgs {
    /// Endpoint to connect to.
    pub endpoint: String,
    /// Method name.
    pub method: String,
    /// JSON params.
    #[arg(long)]
    pub params: Option<String>,
    /// Connection timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Endpoint to connect to.
    pub endpoint: String,
    /// Connection timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_endpoint(input: &str) -> CliResult<Endpoint> {
    input
        .parse()
        .map_err(|err: TransportError| CliError::new(USAGE, err.to_string()))
}

pub fn parse_params(input: Option<&str>) -> CliResult<Value> {
    match input {
        None => Ok(Value::Null),
        Some(text) => serde_json::from_str(text)
            .map_err(|err| CliError::new(DATA_INVALID, format!("invalid --params JSON: {err}"))),
    }
}

pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Connect, retrying while the server is not up yet, until `timeout`.
pub async fn connect_client(endpoint: &Endpoint, timeout: Duration) -> CliResult<Client> {
    let start = Instant::now();
    let config = RemoteConfig::default().with_request_timeout(Some(timeout));
    loop {
        match Client::connect(endpoint, Arc::new(HookRegistry::new()), config.clone()).await {
            Ok(client) => return Ok(client),
            Err(err) => {
                if !is_retryable_connect_error(&err) {
                    return Err(rpc_error("connect failed", err));
                }
                if start.elapsed() >= timeout {
                    return Err(CliError::new(
                        TIMEOUT,
                        format!("connect timed out after {timeout:?}"),
                    ));
                }
                tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
            }
        }
    }
}

fn is_retryable_connect_error(err: &RpcError) -> bool {
    match err {
        RpcError::Transport(TransportError::Connect { source, .. }) => matches!(
            source.kind(),
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timeout_seconds() {
        assert_eq!(parse_timeout("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn parse_timeout_millis() {
        assert_eq!(parse_timeout("150ms").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_timeout_invalid() {
        assert_eq!(parse_timeout("0s").unwrap_err().code, USAGE);
        assert_eq!(parse_timeout("bad").unwrap_err().code, USAGE);
        assert_eq!(parse_timeout(" ").unwrap_err().code, USAGE);
    }

    #[test]
    fn params_default_to_null() {
        assert_eq!(parse_params(None).unwrap(), Value::Null);
        assert_eq!(parse_params(Some("[1,2]")).unwrap(), serde_json::json!([1, 2]));
        assert_eq!(parse_params(Some("{nope")).unwrap_err().code, DATA_INVALID);
    }

    #[test]
    fn bad_endpoint_is_usage_error() {
        assert_eq!(parse_endpoint("no-port-here").unwrap_err().code, USAGE);
        assert_eq!(
            parse_endpoint("tcp://127.0.0.1:9000").unwrap(),
            Endpoint::tcp("127.0.0.1:9000")
        );
    }
}
