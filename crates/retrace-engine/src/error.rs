use thiserror::Error;

use crate::recording::InputKind;
use crate::script::ast::Pos;

/// A script that failed to lex, parse or compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at {line}:{column}")]
pub struct ScriptError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl ScriptError {
    pub(crate) fn new(message: impl Into<String>, pos: Pos) -> Self {
        Self {
            message: message.into(),
            line: pos.line,
            column: pos.column,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Execution needed a value that is not part of the recorded history.
    #[error("execution diverged from the recording: `{0}` has no recorded value")]
    Divergence(InputKind),

    #[error("evaluation did not finish within {0} steps")]
    StepBudgetExceeded(u64),

    #[error("no prior occurrence before the start of the recording")]
    NoPriorOccurrence,

    #[error("no future occurrence before the end of the recording")]
    NoFutureOccurrence,

    #[error("frame {0} does not exist")]
    NoSuchFrame(usize),

    /// The child stopped on purpose (fault injection); its requests die with it.
    #[error("child process aborted")]
    Aborted,

    #[error("child process crashed")]
    ChildProcessCrashed,

    #[error("recording is not finished")]
    RecordingNotFinished,

    #[error("unsupported recording version {0}")]
    UnsupportedRecordingVersion(u32),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid recording: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
