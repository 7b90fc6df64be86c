use std::fmt;
use std::io;

use ezrpc::frame::FrameError;
use ezrpc::remote::RpcError;
use ezrpc::transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
/// The other side answered with an error object.
pub const REMOTE_ERROR: i32 = 70;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::NotFound
        | io::ErrorKind::AddrInUse
        | io::ErrorKind::PermissionDenied => TRANSPORT_ERROR,
        _ => FAILURE,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidEndpoint(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::FrameTooLarge { .. } | FrameError::DelimiterInPayload => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed | FrameError::IncompleteFrame { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

pub fn rpc_error(context: &str, err: RpcError) -> CliError {
    match err {
        RpcError::Transport(err) => transport_error(context, err),
        RpcError::Frame(err) => frame_error(context, err),
        RpcError::Json(err) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        RpcError::Remote(_) => CliError::new(REMOTE_ERROR, format!("{context}: {err}")),
        RpcError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        RpcError::ConnectionClosed | RpcError::NotOpen(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        #[cfg(feature = "schema")]
        RpcError::Schema(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ezrpc::remote::{ErrorObject, State};

    use super::*;

    #[test]
    fn rpc_errors_map_to_exit_codes() {
        let cases = [
            (RpcError::Timeout(Duration::from_secs(1)), TIMEOUT),
            (RpcError::Remote(ErrorObject::new(-32601, "Method not found")), REMOTE_ERROR),
            (RpcError::ConnectionClosed, FAILURE),
            (RpcError::NotOpen(State::Closed), FAILURE),
            (
                RpcError::Frame(FrameError::FrameTooLarge { size: 10, max: 1 }),
                DATA_INVALID,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(rpc_error("ctx", err).code, code);
        }
    }

    #[test]
    fn connect_refused_is_transport_error() {
        let err = TransportError::Connect {
            endpoint: "tcp://127.0.0.1:1".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        let cli = transport_error("connect failed", err);
        assert_eq!(cli.code, TRANSPORT_ERROR);
        assert!(cli.message.starts_with("connect failed: "));
    }
}
