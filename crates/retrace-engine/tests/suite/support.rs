use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use retrace_engine::{
    BreakpointId, ChildLaunch, Completion, Engine, EngineOptions, FaultPlan, Mode, Program,
    Recording, SharedRecording, SiteContext, StopFilter, StopReason, Value,
};

pub const URL: &str = "file:///counter.js";

/// Counts to ten, one timer tick at a time. Line 12 runs once per count.
pub const COUNTER: &str = "\
// counter
let number = 0;
function f() {
  updateNumber();
  if (number >= 10) {
    return;
  }
  setTimeout(f, 1);
}
function updateNumber() {
  number = number + 1;
  let current = number;
}
setTimeout(f, 1);
";

pub fn launch(source: &str, recording: SharedRecording, mode: Mode) -> ChildLaunch {
    ChildLaunch {
        program: Arc::new(Program::compile(URL, source).unwrap()),
        recording,
        mode,
        options: EngineOptions {
            checkpoint_interval: 4,
            eval_budget: 10_000,
        },
        interrupt: Arc::new(AtomicBool::new(false)),
        faults: FaultPlan::none(),
    }
}

pub fn recording_engine(source: &str) -> (Engine, SharedRecording) {
    let recording = Recording::new(URL, source).into_shared();
    let engine = Engine::new(launch(source, recording.clone(), Mode::Recording));
    (engine, recording)
}

pub fn eval(engine: &Engine, source: &str) -> Value {
    match engine.evaluate(0, source, None).unwrap().completion {
        Completion::Returned(value) => value,
        Completion::Threw(value) => panic!("`{source}` threw {value}"),
    }
}

pub fn number(engine: &Engine) -> f64 {
    match eval(engine, "number") {
        Value::Number(value) => value,
        other => panic!("number is {other}"),
    }
}

/// Stops on entry to one line.
pub struct AtLine(pub u32);

impl StopFilter for AtLine {
    fn check(&self, site: &SiteContext<'_>) -> Option<StopReason> {
        (site.line() == self.0 && site.is_line_entry()).then_some(StopReason::Breakpoint {
            breakpoint: BreakpointId(1),
        })
    }
}

/// Stops once execution reaches a point.
pub struct AtProgress(pub u64);

impl StopFilter for AtProgress {
    fn check(&self, site: &SiteContext<'_>) -> Option<StopReason> {
        (site.progress() >= self.0).then_some(StopReason::ResumeLimit)
    }
}
