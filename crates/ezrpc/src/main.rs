mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::exit::{CliError, INTERNAL};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "ezrpc", version, about = "Bidirectional JSON-RPC client and server")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))
        .and_then(|runtime| runtime.block_on(cmd::run(cli.command, format)));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_subcommand() {
        let cli = Cli::try_parse_from([
            "ezrpc",
            "call",
            "127.0.0.1:7000",
            "echo",
            "--params",
            "{\"x\":5}",
            "--timeout",
            "2s",
        ])
        .expect("call args should parse");

        match cli.command {
            Command::Call(args) => {
                assert_eq!(args.method, "echo");
                assert_eq!(args.params.as_deref(), Some("{\"x\":5}"));
                assert_eq!(args.timeout, "2s");
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn call_requires_method() {
        let err = Cli::try_parse_from(["ezrpc", "call", "127.0.0.1:7000"])
            .expect_err("missing method should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_serve_with_global_flags() {
        let cli = Cli::try_parse_from([
            "ezrpc",
            "serve",
            "unix:/tmp/ezrpc.sock",
            "--log-format",
            "json",
            "--format",
            "raw",
        ])
        .expect("serve args should parse");
        assert!(matches!(cli.command, Command::Serve(_)));
        assert!(matches!(cli.log_format, LogFormat::Json));
        assert!(matches!(cli.format, Some(OutputFormat::Raw)));
    }

    #[test]
    fn parses_info_subcommand() {
        let cli = Cli::try_parse_from(["ezrpc", "info", "127.0.0.1:7000", "--timeout", "3s"])
            .expect("info args should parse");
        assert!(matches!(cli.command, Command::Info(_)));
    }
}
