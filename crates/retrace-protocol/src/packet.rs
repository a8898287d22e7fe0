use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Actors are addressed by name (`"root"`, `"thread1"`, ...).
pub type ActorId = String;

pub const ROOT_ACTOR: &str = "root";

/// Unsolicited packet types. Everything else a server sends answers a request.
pub const EVENT_TYPES: &[&str] = &["paused", "fatalError"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    UnknownActor,
    UnrecognizedPacketType,
    BadParameterType,
    NotPaused,
    NotRunning,
    WrongState,
    NoSuchBreakpoint,
    NoPriorOccurrence,
    NoFutureOccurrence,
    ChildProcessCrashed,
    FatalError,
    RecordingNotFinished,
    Divergence,
    EvaluationTimeout,
    ScriptError,
    IoError,
    /// Never sent by a server; the client reports it when the channel drops.
    ConnectionClosed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::UnknownActor => "unknownActor",
            ErrorCode::UnrecognizedPacketType => "unrecognizedPacketType",
            ErrorCode::BadParameterType => "badParameterType",
            ErrorCode::NotPaused => "notPaused",
            ErrorCode::NotRunning => "notRunning",
            ErrorCode::WrongState => "wrongState",
            ErrorCode::NoSuchBreakpoint => "noSuchBreakpoint",
            ErrorCode::NoPriorOccurrence => "noPriorOccurrence",
            ErrorCode::NoFutureOccurrence => "noFutureOccurrence",
            ErrorCode::ChildProcessCrashed => "childProcessCrashed",
            ErrorCode::FatalError => "fatalError",
            ErrorCode::RecordingNotFinished => "recordingNotFinished",
            ErrorCode::Divergence => "divergence",
            ErrorCode::EvaluationTimeout => "evaluationTimeout",
            ErrorCode::ScriptError => "scriptError",
            ErrorCode::IoError => "ioError",
            ErrorCode::ConnectionClosed => "connectionClosed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{to, type, ...args}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub to: ActorId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub args: Map<String, Value>,
}

impl Request {
    /// `args` must be a JSON object (or null); other values are ignored.
    pub fn new(to: impl Into<ActorId>, kind: impl Into<String>, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            to: to.into(),
            kind: kind.into(),
            args,
        }
    }

    pub fn into_value(self) -> Value {
        let mut map = self.args;
        map.insert("to".to_owned(), Value::String(self.to));
        map.insert("type".to_owned(), Value::String(self.kind));
        Value::Object(map)
    }
}

/// `{from, ...body}`. A non-object body is wrapped under `"value"`.
pub fn make_response(from: &str, body: Value) -> Value {
    let mut map = match body {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_owned(), other);
            map
        }
    };
    map.insert("from".to_owned(), Value::String(from.to_owned()));
    Value::Object(map)
}

/// `{from, error, message}`
pub fn make_error(from: &str, code: ErrorCode, message: impl Into<String>) -> Value {
    let mut map = Map::new();
    map.insert("from".to_owned(), Value::String(from.to_owned()));
    map.insert("error".to_owned(), Value::String(code.as_str().to_owned()));
    map.insert("message".to_owned(), Value::String(message.into()));
    Value::Object(map)
}

/// `{from, type, ...body}`
pub fn make_event(from: &str, kind: &str, body: Value) -> Value {
    let mut packet = make_response(from, body);
    if let Value::Object(map) = &mut packet {
        map.insert("type".to_owned(), Value::String(kind.to_owned()));
    }
    packet
}

pub fn packet_from(packet: &Value) -> Option<&str> {
    packet.get("from").and_then(Value::as_str)
}

pub fn packet_type(packet: &Value) -> Option<&str> {
    packet.get("type").and_then(Value::as_str)
}

pub fn is_event(packet: &Value) -> bool {
    packet_type(packet).is_some_and(|kind| EVENT_TYPES.contains(&kind))
}

/// `(code, message)` when the packet is an error response.
pub fn packet_error(packet: &Value) -> Option<(&str, &str)> {
    let code = packet.get("error").and_then(Value::as_str)?;
    let message = packet
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some((code, message))
}
