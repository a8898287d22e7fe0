//! The durable artifact of a recorded execution.
//!
//! A recording holds the script itself plus every value the script observed
//! that did not come from the script: `Math.random()` and `Date.now()` results.
//! Replaying the script against the same inputs reproduces the same execution
//! site for site. Console output is stored with its execution point so clients
//! can jump to it.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub const RECORDING_VERSION: u32 = 1;

pub type SharedRecording = Arc<RwLock<Recording>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputKind {
    Random,
    Now,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputKind::Random => f.write_str("Math.random()"),
            InputKind::Now => f.write_str("Date.now()"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedInput {
    pub kind: InputKind,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsoleLevel {
    Log,
    Error,
}

impl ConsoleLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleMessage {
    pub level: ConsoleLevel,
    pub text: String,
    pub execution_point: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    version: u32,
    url: String,
    source: String,
    inputs: Vec<RecordedInput>,
    console: Vec<ConsoleMessage>,
    /// Furthest execution point reached while recording.
    frontier: u64,
    end: Option<u64>,
    /// Set when the recording was ended explicitly before the script finished.
    #[serde(default)]
    truncated: bool,
}

impl Recording {
    pub fn new(url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            version: RECORDING_VERSION,
            url: url.into(),
            source: source.into(),
            inputs: Vec::new(),
            console: Vec::new(),
            frontier: 0,
            end: None,
            truncated: false,
        }
    }

    pub fn into_shared(self) -> SharedRecording {
        Arc::new(RwLock::new(self))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn inputs(&self) -> &[RecordedInput] {
        &self.inputs
    }

    pub fn console(&self) -> &[ConsoleMessage] {
        &self.console
    }

    pub fn frontier(&self) -> u64 {
        self.frontier
    }

    /// The last execution point, once the recording is finished.
    pub fn end(&self) -> Option<u64> {
        self.end
    }

    pub fn is_finished(&self) -> bool {
        self.end.is_some()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub(crate) fn input(&self, index: u64) -> Option<&RecordedInput> {
        usize::try_from(index).ok().and_then(|index| self.inputs.get(index))
    }

    pub(crate) fn push_input(&mut self, kind: InputKind, value: f64) {
        self.inputs.push(RecordedInput { kind, value });
    }

    pub(crate) fn push_console(&mut self, index: u64, message: ConsoleMessage) {
        if index as usize == self.console.len() {
            self.console.push(message);
        }
    }

    pub(crate) fn advance_frontier(&mut self, progress: u64) {
        self.frontier = self.frontier.max(progress);
    }

    /// The script ran to completion.
    pub(crate) fn complete(&mut self, end: u64) {
        self.advance_frontier(end);
        if self.end.is_none() {
            self.end = Some(end);
        }
    }

    /// Stop recording at the frontier without waiting for the script.
    pub(crate) fn truncate(&mut self) -> u64 {
        if self.end.is_none() {
            self.end = Some(self.frontier);
            self.truncated = true;
        }
        self.end.unwrap_or(self.frontier)
    }

    pub fn to_json(&self) -> Result<String> {
        if !self.is_finished() {
            return Err(EngineError::RecordingNotFinished);
        }
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        // Check the version before the shape so a newer format gets a clear error.
        let raw: serde_json::Value = serde_json::from_str(text)?;
        let version = raw
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        if version != u64::from(RECORDING_VERSION) {
            return Err(EngineError::UnsupportedRecordingVersion(
                u32::try_from(version).unwrap_or(u32::MAX),
            ));
        }
        let recording: Recording = serde_json::from_value(raw)?;
        if !recording.is_finished() {
            return Err(EngineError::RecordingNotFinished);
        }
        Ok(recording)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = self.to_json()?;
        std::fs::write(path, text)?;
        tracing::info!(
            target: "retrace.engine",
            path = %path.display(),
            inputs = self.inputs.len(),
            end = ?self.end,
            "saved recording"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let recording = Self::from_json(&text)?;
        tracing::info!(
            target: "retrace.engine",
            path = %path.display(),
            url = %recording.url,
            "loaded recording"
        );
        Ok(recording)
    }
}
