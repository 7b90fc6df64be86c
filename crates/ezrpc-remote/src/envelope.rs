//! JSON-RPC 2.0 envelope codec.
//!
//! Every message on the wire is one of four shapes:
//!
//! ```text
//! Request       {"jsonrpc":"2.0","id":1,"method":"m","params":..}
//! Notification  {"jsonrpc":"2.0","method":"m","params":..}
//! Success       {"jsonrpc":"2.0","id":1,"result":..}
//! Failure       {"jsonrpc":"2.0","id":1|null,"error":{"code":..,"message":..,"data":..}}
//! ```
//!
//! A frame may also carry a JSON array of these (a batch). Decoding never
//! fails: anything that does not fit becomes a [`Malformed`] describing why.
//!
//! Inbound messages must carry `"jsonrpc":"2.0"`. A frame without it, such
//! as `{"id":"1","method":"echo"}`, is an invalid request and is answered
//! with `-32600` rather than dispatched.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Number, Value};

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

const MEMBERS: [&str; 6] = ["jsonrpc", "id", "method", "params", "result", "error"];

/// Request identifier: a string or any JSON number, echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(Number),
    Str(String),
}

impl Id {
    /// Interpret a JSON value as an identifier. `null` and structured
    /// values are not identifiers.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<Number> for Id {
    fn from(value: Number) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// The `error` member of a failure response.
///
/// Hooks return this as their error type; it is sent to the caller as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} ({code})")]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, "Parse error").with_data(Value::String(detail.into()))
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request").with_data(Value::String(detail.into()))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, "Method not found").with_data(method)
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, "Invalid params").with_data(Value::String(detail.into()))
    }

    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, "Internal error").with_data(Value::String(detail.into()))
    }
}

/// One well-formed message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request {
        id: Id,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Success {
        id: Id,
        result: Value,
    },
    Failure {
        /// `None` when the failing message had no usable id.
        id: Option<Id>,
        error: ErrorObject,
    },
}

impl Envelope {
    /// Serialize to compact JSON bytes.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decode exactly one envelope. Batches are rejected as `InvalidRequest`.
    pub fn decode(bytes: &[u8]) -> Result<Self, Malformed> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Array(_)) => Err(Malformed::invalid(None, "batch not allowed here")),
            Ok(value) => Self::from_value(value),
            Err(err) => Err(Malformed::parse(err)),
        }
    }

    /// Classify a parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, Malformed> {
        let Value::Object(mut map) = value else {
            return Err(Malformed::invalid(None, "message is not an object"));
        };

        let has_method = map.contains_key("method");
        let has_result = map.contains_key("result");
        let has_error = map.contains_key("error");

        // Only request-shaped messages are worth answering.
        let salvaged = if has_result || has_error {
            None
        } else {
            map.get("id").and_then(Id::from_value)
        };
        let invalid = |detail: String| Malformed::invalid(salvaged.clone(), detail);

        if let Some(key) = map.keys().find(|key| !MEMBERS.contains(&key.as_str())) {
            return Err(invalid(format!("unexpected member '{key}'")));
        }
        match map.get("jsonrpc") {
            Some(Value::String(version)) if version == JSONRPC_VERSION => {}
            Some(other) => return Err(invalid(format!("unsupported jsonrpc version {other}"))),
            None => return Err(invalid("missing jsonrpc member".to_string())),
        }

        match (has_method, has_result, has_error) {
            (true, false, false) => {
                let method = match map.remove("method") {
                    Some(Value::String(method)) => method,
                    _ => return Err(invalid("method must be a string".to_string())),
                };
                let params = map.remove("params");
                match map.remove("id") {
                    None => Ok(Self::Notification { method, params }),
                    Some(raw) => match Id::from_value(&raw) {
                        Some(id) => Ok(Self::Request { id, method, params }),
                        None => Err(invalid(format!("invalid request id {raw}"))),
                    },
                }
            }
            (false, true, false) => {
                if map.contains_key("params") {
                    return Err(invalid("response carries params".to_string()));
                }
                let id = take_response_id(&mut map)?
                    .ok_or_else(|| invalid("success response with null id".to_string()))?;
                let result = map.remove("result").unwrap_or(Value::Null);
                Ok(Self::Success { id, result })
            }
            (false, false, true) => {
                if map.contains_key("params") {
                    return Err(invalid("response carries params".to_string()));
                }
                let id = take_response_id(&mut map)?;
                let raw = map.remove("error").unwrap_or(Value::Null);
                let error = serde_json::from_value::<ErrorObject>(raw)
                    .map_err(|err| invalid(format!("invalid error object: {err}")))?;
                Ok(Self::Failure { id, error })
            }
            (false, false, false) => Err(invalid("missing method, result or error".to_string())),
            _ => Err(invalid(
                "more than one of method, result, error".to_string(),
            )),
        }
    }

    /// The id carried by this envelope, if any.
    pub fn id(&self) -> Option<&Id> {
        match self {
            Self::Request { id, .. } | Self::Success { id, .. } => Some(id),
            Self::Failure { id, .. } => id.as_ref(),
            Self::Notification { .. } => None,
        }
    }

    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            _ => None,
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Failure { .. })
    }
}

/// Response id: must be present; `null` becomes `None`.
fn take_response_id(map: &mut Map<String, Value>) -> Result<Option<Id>, Malformed> {
    match map.remove("id") {
        None => Err(Malformed::invalid(None, "response without id")),
        Some(Value::Null) => Ok(None),
        Some(raw) => Id::from_value(&raw)
            .map(Some)
            .ok_or_else(|| Malformed::invalid(None, format!("invalid response id {raw}"))),
    }
}

#[derive(Serialize)]
struct Wire<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Option<&'a Id>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ErrorObject>,
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut wire = Wire {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        };
        match self {
            Self::Request { id, method, params } => {
                wire.id = Some(Some(id));
                wire.method = Some(method);
                wire.params = params.as_ref();
            }
            Self::Notification { method, params } => {
                wire.method = Some(method);
                wire.params = params.as_ref();
            }
            Self::Success { id, result } => {
                wire.id = Some(Some(id));
                wire.result = Some(result);
            }
            Self::Failure { id, error } => {
                wire.id = Some(id.as_ref());
                wire.error = Some(error);
            }
        }
        wire.serialize(serializer)
    }
}

/// Why an inbound message could not be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedKind {
    /// The bytes are not JSON.
    Parse,
    /// Valid JSON that is not a valid envelope.
    InvalidRequest,
}

impl fmt::Display for MalformedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse => f.write_str("parse error"),
            Self::InvalidRequest => f.write_str("invalid request"),
        }
    }
}

/// An inbound message that is not a well-formed envelope.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct Malformed {
    pub kind: MalformedKind,
    /// Id recovered from a request-shaped message, if valid.
    pub id: Option<Id>,
    pub detail: String,
}

impl Malformed {
    fn parse(err: serde_json::Error) -> Self {
        Self {
            kind: MalformedKind::Parse,
            id: None,
            detail: err.to_string(),
        }
    }

    fn invalid(id: Option<Id>, detail: impl Into<String>) -> Self {
        Self {
            kind: MalformedKind::InvalidRequest,
            id,
            detail: detail.into(),
        }
    }

    /// The standard error object for this failure.
    pub fn to_error_object(&self) -> ErrorObject {
        match self.kind {
            MalformedKind::Parse => ErrorObject::parse_error(self.detail.clone()),
            MalformedKind::InvalidRequest => ErrorObject::invalid_request(self.detail.clone()),
        }
    }

    /// Failure response to send back, when an id was recovered.
    pub fn response(&self) -> Option<Envelope> {
        self.id.clone().map(|id| Envelope::Failure {
            id: Some(id),
            error: self.to_error_object(),
        })
    }
}

/// Contents of one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Single(Result<Envelope, Malformed>),
    Batch(Vec<Result<Envelope, Malformed>>),
}

impl Inbound {
    /// Decode a frame payload: one envelope or a non-empty batch.
    pub fn decode(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Array(items)) if items.is_empty() => {
                Self::Single(Err(Malformed::invalid(None, "empty batch")))
            }
            Ok(Value::Array(items)) => {
                Self::Batch(items.into_iter().map(Envelope::from_value).collect())
            }
            Ok(value) => Self::Single(Envelope::from_value(value)),
            Err(err) => Self::Single(Err(Malformed::parse(err))),
        }
    }

    /// Flatten into individual messages in wire order.
    pub fn into_messages(self) -> Vec<Result<Envelope, Malformed>> {
        match self {
            Self::Single(message) => vec![message],
            Self::Batch(messages) => messages,
        }
    }
}
