use retrace_engine::EngineError;
use retrace_protocol::ErrorCode;
use thiserror::Error;

pub type Result<T, E = DebuggerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DebuggerError {
    #[error("no actor named `{0}`")]
    UnknownActor(String),

    #[error("`{0}` is not a command this actor understands")]
    UnrecognizedPacketType(String),

    #[error("bad parameters for `{kind}`: {message}")]
    BadParameterType { kind: String, message: String },

    #[error("thread is not paused")]
    NotPaused,

    #[error("thread is not running")]
    NotRunning,

    #[error("thread is detached")]
    Detached,

    #[error("no breakpoint with id {0}")]
    NoSuchBreakpoint(u32),

    /// The target was torn down after repeated child crashes.
    #[error("{0}")]
    Fatal(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl DebuggerError {
    pub fn bad_parameters(kind: &str, message: impl ToString) -> Self {
        Self::BadParameterType {
            kind: kind.to_owned(),
            message: message.to_string(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            DebuggerError::UnknownActor(_) => ErrorCode::UnknownActor,
            DebuggerError::UnrecognizedPacketType(_) => ErrorCode::UnrecognizedPacketType,
            DebuggerError::BadParameterType { .. } => ErrorCode::BadParameterType,
            DebuggerError::NotPaused => ErrorCode::NotPaused,
            DebuggerError::NotRunning => ErrorCode::NotRunning,
            DebuggerError::Detached => ErrorCode::WrongState,
            DebuggerError::NoSuchBreakpoint(_) => ErrorCode::NoSuchBreakpoint,
            DebuggerError::Fatal(_) => ErrorCode::FatalError,
            DebuggerError::Engine(err) => engine_error_code(err),
        }
    }
}

fn engine_error_code(err: &EngineError) -> ErrorCode {
    match err {
        EngineError::Script(_) => ErrorCode::ScriptError,
        EngineError::Divergence(_) => ErrorCode::Divergence,
        EngineError::StepBudgetExceeded(_) => ErrorCode::EvaluationTimeout,
        EngineError::NoPriorOccurrence => ErrorCode::NoPriorOccurrence,
        EngineError::NoFutureOccurrence => ErrorCode::NoFutureOccurrence,
        EngineError::NoSuchFrame(_) => ErrorCode::BadParameterType,
        EngineError::Aborted | EngineError::ChildProcessCrashed => ErrorCode::ChildProcessCrashed,
        EngineError::RecordingNotFinished => ErrorCode::RecordingNotFinished,
        EngineError::UnsupportedRecordingVersion(_)
        | EngineError::Io(_)
        | EngineError::Json(_) => ErrorCode::IoError,
    }
}
