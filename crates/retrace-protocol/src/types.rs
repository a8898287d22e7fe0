//! Typed views of the packet bodies both sides agree on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::packet::ActorId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub url: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameForm {
    /// 0 is the youngest frame.
    pub depth: usize,
    pub name: String,
    pub serial: u64,
    #[serde(rename = "where", default)]
    pub location: Option<SourceLocation>,
    #[serde(default)]
    pub locals: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Why {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedPacket {
    pub from: ActorId,
    pub why: Why,
    #[serde(default)]
    pub frame: Option<FrameForm>,
    pub execution_point: u64,
}

impl PausedPacket {
    pub fn line(&self) -> Option<u32> {
        self.frame
            .as_ref()
            .and_then(|frame| frame.location.as_ref())
            .map(|location| location.line)
    }

    pub fn local(&self, name: &str) -> Option<&Value> {
        self.frame.as_ref().and_then(|frame| frame.locals.get(name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointForm {
    pub id: u32,
    pub location: SourceLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointForm {
    pub id: u64,
    pub execution_point: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleMessageForm {
    pub level: String,
    pub text: String,
    pub execution_point: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedPauseForm {
    pub why: Why,
    #[serde(default)]
    pub location: Option<SourceLocation>,
}

/// Exactly one of `result` and `exception` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationForm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested_pauses: Vec<NestedPauseForm>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadForm {
    pub actor: ActorId,
    pub url: String,
    /// `"recording"` or `"replaying"`.
    pub mode: String,
    pub state: String,
}
