//! The stop filter a thread hands to its child for one movement.

use std::sync::Arc;

use retrace_config::ConditionErrorPolicy;
use retrace_engine::{BreakpointId, Completion, FrameInfo, SiteContext, SiteKind, StopFilter, StopReason};

use crate::breakpoints::BreakpointTable;

/// Thread options that shape every run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PauseOptions {
    pub pause_on_exceptions: bool,
    pub skip_breakpoints: bool,
    pub condition_errors: ConditionErrorPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Over,
    In,
    Out,
}

/// Where a step started. The step ends at the first site that satisfies its
/// kind, in whichever direction the run goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLimit {
    kind: StepKind,
    depth: usize,
    serial: u64,
    location: Option<(u32, u32)>,
}

impl StepLimit {
    /// `frames` is the paused stack, youngest first.
    pub fn new(kind: StepKind, frames: &[FrameInfo]) -> Self {
        let youngest = frames.first();
        Self {
            kind,
            depth: frames.len(),
            serial: youngest.map_or(0, |frame| frame.serial),
            location: youngest.and_then(|frame| frame.location),
        }
    }

    fn reached(&self, site: &SiteContext<'_>) -> bool {
        let same_frame = self.location.is_some() && site.frame_serial() == self.serial;
        let moved = self.location != Some((site.line(), site.column()));
        match self.kind {
            StepKind::Over => (same_frame && moved) || site.depth() < self.depth,
            StepKind::In => !same_frame || moved,
            StepKind::Out => site.depth() < self.depth,
        }
    }
}

pub struct ThreadStopFilter {
    breakpoints: Arc<BreakpointTable>,
    options: PauseOptions,
    step: Option<StepLimit>,
    line: Option<u32>,
}

impl ThreadStopFilter {
    pub fn new(breakpoints: Arc<BreakpointTable>, options: PauseOptions) -> Self {
        Self {
            breakpoints,
            options,
            step: None,
            line: None,
        }
    }

    pub fn with_step(mut self, step: StepLimit) -> Self {
        self.step = Some(step);
        self
    }

    /// Stop only on entry to `line`.
    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    fn breakpoint_at(&self, site: &SiteContext<'_>) -> Option<StopReason> {
        if self.options.skip_breakpoints {
            return None;
        }
        let breakpoint = self.breakpoints.lookup_site(
            site.url(),
            site.line(),
            site.column(),
            site.is_line_entry(),
        )?;
        let id = breakpoint.id;
        let Some(condition) = breakpoint.condition.as_deref() else {
            return Some(StopReason::Breakpoint { breakpoint: id });
        };
        match site.evaluate(condition) {
            Ok(Completion::Returned(value)) => value
                .is_truthy()
                .then_some(StopReason::Breakpoint { breakpoint: id }),
            Ok(Completion::Threw(exception)) => self.condition_failed(id, exception.to_string()),
            Err(err) => self.condition_failed(id, err.to_string()),
        }
    }

    fn condition_failed(&self, breakpoint: BreakpointId, message: String) -> Option<StopReason> {
        let pause = match self.options.condition_errors {
            ConditionErrorPolicy::FollowPauseOnExceptions => self.options.pause_on_exceptions,
            ConditionErrorPolicy::Ignore => false,
            ConditionErrorPolicy::Pause => true,
        };
        tracing::debug!(
            target: "retrace.debugger",
            breakpoint = breakpoint.0,
            pause,
            "breakpoint condition failed"
        );
        pause.then_some(StopReason::BreakpointConditionThrown {
            breakpoint,
            message,
        })
    }
}

impl StopFilter for ThreadStopFilter {
    fn check(&self, site: &SiteContext<'_>) -> Option<StopReason> {
        if let Some(line) = self.line {
            if site.line() != line || !site.is_line_entry() {
                return None;
            }
            return self.breakpoint_at(site).or(Some(StopReason::ResumeLimit));
        }

        match site.kind() {
            SiteKind::Exception(exception) => {
                return self.options.pause_on_exceptions.then(|| StopReason::Exception {
                    exception: exception.clone(),
                });
            }
            SiteKind::DebuggerStatement if !self.options.skip_breakpoints => {
                return Some(StopReason::DebuggerStatement);
            }
            _ => {}
        }

        if let Some(reason) = self.breakpoint_at(site) {
            return Some(reason);
        }
        self.step
            .filter(|step| step.reached(site))
            .map(|_| StopReason::ResumeLimit)
    }
}
