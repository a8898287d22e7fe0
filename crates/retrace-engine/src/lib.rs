//! A small deterministic script engine that can be recorded and replayed.
//!
//! Scripts are compiled to bytecode and run on a stack VM whose state can be
//! cloned at any execution site. Inputs from outside the script go into a
//! [`Recording`]; replaying the recording reproduces the execution exactly,
//! which lets an [`Engine`] run backward by replaying forward from
//! checkpoints. Debuggers talk to an engine through a [`ChildProcess`].

mod bytecode;
mod checkpoint;
mod child;
mod engine;
mod error;
mod fault;
mod recording;
pub mod script;
mod stop;
mod value;
mod vm;

pub use bytecode::{FunctionId, Program};
pub use checkpoint::{CheckpointId, CheckpointInfo};
pub use child::{ChildLaunch, ChildProcess, ChildReply, ChildRequest};
pub use engine::{Direction, Engine, EngineOptions, Mode, Position, SeekPoint, Stop};
pub use error::{EngineError, Result, ScriptError};
pub use fault::FaultPlan;
pub use recording::{
    ConsoleLevel, ConsoleMessage, InputKind, RecordedInput, Recording, SharedRecording,
    RECORDING_VERSION,
};
pub use stop::{BreakpointId, NeverStop, SiteContext, StopFilter, StopReason};
pub use value::{format_number, ErrorObject, Value};
pub use vm::{Completion, Evaluation, FrameInfo, NestedPause, SiteKind};

#[cfg(feature = "fuzzing")]
pub mod fuzzing {
    /// Parse and compile arbitrary bytes; must never panic.
    pub fn compile_script(input: &[u8]) {
        if let Ok(source) = std::str::from_utf8(input) {
            let _ = crate::Program::compile("file:///fuzz.js", source);
        }
    }
}
