//! Typed requests for the root actor and for thread actors.

use std::path::PathBuf;

use retrace_engine::Direction;
use retrace_protocol::{Request, SourceLocation};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{DebuggerError, Result};
use crate::filter::StepKind;

pub const ROOT_COMMANDS: &[&str] = &["listThreads", "startRecording", "loadRecording"];

pub const THREAD_COMMANDS: &[&str] = &[
    "setBreakpoint",
    "removeBreakpoint",
    "setBreakpointEnabled",
    "listBreakpoints",
    "pauseOnExceptions",
    "skipBreakpoints",
    "resume",
    "rewind",
    "stepOver",
    "stepIn",
    "stepOut",
    "reverseStepOver",
    "reverseStepIn",
    "reverseStepOut",
    "rewindToLine",
    "resumeToLine",
    "timeWarp",
    "interrupt",
    "detach",
    "evaluate",
    "frames",
    "checkpoints",
    "consoleMessages",
    "endRecording",
    "saveRecording",
    "dumpThread",
];

/// Commands that move the paused position.
pub const MOVEMENT_COMMANDS: &[&str] = &[
    "resume",
    "rewind",
    "stepOver",
    "stepIn",
    "stepOut",
    "reverseStepOver",
    "reverseStepIn",
    "reverseStepOut",
    "rewindToLine",
    "resumeToLine",
    "timeWarp",
];

pub fn is_movement(kind: &str) -> bool {
    MOVEMENT_COMMANDS.contains(&kind)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RootRequest {
    ListThreads,
    StartRecording { url: String, source: String },
    LoadRecording { path: PathBuf },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResumeLimit {
    Next,
    Step,
    Finish,
    Warp { target: u64 },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ThreadRequest {
    SetBreakpoint {
        location: SourceLocation,
        #[serde(default)]
        condition: Option<String>,
    },
    RemoveBreakpoint {
        breakpoint: u32,
    },
    SetBreakpointEnabled {
        breakpoint: u32,
        enabled: bool,
    },
    ListBreakpoints,
    PauseOnExceptions {
        #[serde(rename = "pauseOnExceptions")]
        enabled: bool,
    },
    SkipBreakpoints {
        skip: bool,
    },
    Resume {
        #[serde(default)]
        rewind: bool,
        #[serde(default, rename = "resumeLimit")]
        limit: Option<ResumeLimit>,
    },
    Rewind,
    StepOver,
    StepIn,
    StepOut,
    ReverseStepOver,
    ReverseStepIn,
    ReverseStepOut,
    RewindToLine {
        line: u32,
    },
    ResumeToLine {
        line: u32,
    },
    TimeWarp {
        target: u64,
    },
    Interrupt,
    Detach,
    Evaluate {
        expression: String,
        #[serde(default)]
        frame: usize,
    },
    Frames,
    Checkpoints,
    ConsoleMessages,
    EndRecording,
    SaveRecording {
        path: PathBuf,
    },
    DumpThread,
}

/// A movement of the paused position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    Run(Direction),
    Step(Direction, StepKind),
    ToLine(Direction, u32),
    Warp(u64),
}

impl ThreadRequest {
    pub fn motion(&self) -> Option<Motion> {
        use Direction::{Backward, Forward};

        let motion = match self {
            ThreadRequest::Resume { rewind, limit } => {
                let direction = if *rewind { Backward } else { Forward };
                match limit {
                    None => Motion::Run(direction),
                    Some(ResumeLimit::Next) => Motion::Step(direction, StepKind::Over),
                    Some(ResumeLimit::Step) => Motion::Step(direction, StepKind::In),
                    Some(ResumeLimit::Finish) => Motion::Step(direction, StepKind::Out),
                    Some(ResumeLimit::Warp { target }) => Motion::Warp(*target),
                }
            }
            ThreadRequest::Rewind => Motion::Run(Backward),
            ThreadRequest::StepOver => Motion::Step(Forward, StepKind::Over),
            ThreadRequest::StepIn => Motion::Step(Forward, StepKind::In),
            ThreadRequest::StepOut => Motion::Step(Forward, StepKind::Out),
            ThreadRequest::ReverseStepOver => Motion::Step(Backward, StepKind::Over),
            ThreadRequest::ReverseStepIn => Motion::Step(Backward, StepKind::In),
            ThreadRequest::ReverseStepOut => Motion::Step(Backward, StepKind::Out),
            ThreadRequest::RewindToLine { line } => Motion::ToLine(Backward, *line),
            ThreadRequest::ResumeToLine { line } => Motion::ToLine(Forward, *line),
            ThreadRequest::TimeWarp { target } => Motion::Warp(*target),
            _ => return None,
        };
        Some(motion)
    }
}

/// Decode `request` if its type is one of `known`.
pub fn parse<T: DeserializeOwned>(request: Request, known: &[&str]) -> Result<T> {
    if !known.contains(&request.kind.as_str()) {
        return Err(DebuggerError::UnrecognizedPacketType(request.kind));
    }
    let kind = request.kind.clone();
    serde_json::from_value(request.into_value())
        .map_err(|err| DebuggerError::bad_parameters(&kind, err))
}
