//! Deciding where execution stops.
//!
//! The engine reports every execution site to a [`StopFilter`]. The filter sees
//! the site, can evaluate conditions in the paused state, and answers with the
//! reason to stop there, if any.

use serde::{Deserialize, Serialize};

use crate::bytecode::Program;
use crate::error::Result;
use crate::value::Value;
use crate::vm::{self, Completion, SiteEvent, SiteKind, VmState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BreakpointId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Breakpoint { breakpoint: BreakpointId },
    /// The breakpoint's condition failed to evaluate.
    BreakpointConditionThrown {
        breakpoint: BreakpointId,
        message: String,
    },
    DebuggerStatement,
    Exception { exception: Value },
    /// A step or a line target was reached.
    ResumeLimit,
    Interrupted,
    Finished,
    TimeWarp,
    Attached,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Breakpoint { .. } => "breakpoint",
            StopReason::BreakpointConditionThrown { .. } => "breakpointConditionThrown",
            StopReason::DebuggerStatement => "debuggerStatement",
            StopReason::Exception { .. } => "exception",
            StopReason::ResumeLimit => "resumeLimit",
            StopReason::Interrupted => "interrupted",
            StopReason::Finished => "finished",
            StopReason::TimeWarp => "timeWarp",
            StopReason::Attached => "attached",
        }
    }
}

pub trait StopFilter: Send + Sync {
    fn check(&self, site: &SiteContext<'_>) -> Option<StopReason>;
}

/// Runs until the end of the recording.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverStop;

impl StopFilter for NeverStop {
    fn check(&self, _site: &SiteContext<'_>) -> Option<StopReason> {
        None
    }
}

/// A site as seen by a [`StopFilter`].
pub struct SiteContext<'a> {
    event: &'a SiteEvent,
    state: &'a VmState,
    program: &'a Program,
    eval_budget: u64,
}

impl<'a> SiteContext<'a> {
    pub(crate) fn new(
        event: &'a SiteEvent,
        state: &'a VmState,
        program: &'a Program,
        eval_budget: u64,
    ) -> Self {
        Self {
            event,
            state,
            program,
            eval_budget,
        }
    }

    pub fn url(&self) -> &str {
        self.program.url()
    }

    pub fn progress(&self) -> u64 {
        self.event.progress
    }

    pub fn line(&self) -> u32 {
        self.event.line
    }

    pub fn column(&self) -> u32 {
        self.event.column
    }

    pub fn kind(&self) -> &SiteKind {
        &self.event.kind
    }

    /// Number of frames on the stack, 1 for top-level code.
    pub fn depth(&self) -> usize {
        self.event.depth
    }

    pub fn frame_serial(&self) -> u64 {
        self.event.frame_serial
    }

    /// First site on this line since execution was on another line or frame.
    pub fn is_line_entry(&self) -> bool {
        self.event.line_entry
    }

    /// Evaluate `source` in the youngest frame at this site. Nothing it does is
    /// visible afterwards, and nested sites never stop.
    pub fn evaluate(&self, source: &str) -> Result<Completion> {
        vm::evaluate(self.state, self.program, 0, source, None, self.eval_budget)
            .map(|evaluation| evaluation.completion)
    }
}
