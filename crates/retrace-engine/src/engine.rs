//! Moving through a recorded execution.
//!
//! Forward motion runs the VM. Backward motion restarts from the nearest
//! checkpoint before the current point and replays forward, remembering the last
//! site the filter stopped at; if a checkpoint interval has none, the interval
//! before it is tried, down to the start of the recording.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::bytecode::Program;
use crate::checkpoint::{CheckpointInfo, CheckpointStore};
use crate::child::{ChildLaunch, ChildReply, ChildRequest};
use crate::error::{EngineError, Result};
use crate::fault::FaultPlan;
use crate::recording::{ConsoleLevel, ConsoleMessage, InputKind, SharedRecording};
use crate::stop::{SiteContext, StopFilter, StopReason};
use crate::vm::{self, Evaluation, Exec, FrameInfo, SiteEvent, VmIo, VmState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    /// Executing live; new inputs are appended to the recording.
    Recording,
    /// Executing a finished recording.
    Replaying,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Recording => "recording",
            Mode::Replaying => "replaying",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub checkpoint_interval: u64,
    /// Step budget for evaluations and breakpoint conditions.
    pub eval_budget: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            checkpoint_interval: 32,
            eval_budget: 100_000,
        }
    }
}

/// Enough to put a fresh engine back where another one was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeekPoint {
    pub progress: u64,
    /// Past the last site, with nothing left to run.
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub progress: u64,
    pub finished: bool,
    /// Youngest first.
    pub frames: Vec<FrameInfo>,
}

impl Position {
    pub fn seek_point(&self) -> SeekPoint {
        SeekPoint {
            progress: self.progress,
            finished: self.finished,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub reason: StopReason,
    pub position: Position,
}

pub struct Engine {
    program: Arc<Program>,
    vm: VmState,
    recording: SharedRecording,
    checkpoints: CheckpointStore,
    mode: Mode,
    options: EngineOptions,
    interrupt: Arc<AtomicBool>,
    faults: FaultPlan,
}

impl Engine {
    pub fn new(launch: ChildLaunch) -> Self {
        let vm = VmState::new(&launch.program);
        let checkpoints = CheckpointStore::new(&vm, launch.options.checkpoint_interval);
        Self {
            program: launch.program,
            vm,
            recording: launch.recording,
            checkpoints,
            mode: launch.mode,
            options: launch.options,
            interrupt: launch.interrupt,
            faults: launch.faults,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn position(&self) -> Position {
        Position {
            progress: self.vm.progress(),
            finished: self.vm.is_finished(),
            frames: self.vm.frames(),
        }
    }

    pub fn checkpoints(&self) -> Vec<CheckpointInfo> {
        self.checkpoints.list()
    }

    /// Take the initial position: the first site when recording, the end of the
    /// recording when replaying.
    pub fn attach(&mut self) -> Result<Stop> {
        match self.mode {
            Mode::Recording => {
                let live = self.is_live();
                let mut io = RecordingIo::new(&self.recording, live);
                let first = next_site(&self.program, &mut self.vm, &mut io, &mut self.checkpoints)?;
                self.sync_recording(live);
                let reason = match first {
                    Some(_) => StopReason::Attached,
                    None => StopReason::Finished,
                };
                Ok(self.stop(reason))
            }
            Mode::Replaying => {
                self.seek_end()?;
                Ok(self.stop(StopReason::Finished))
            }
        }
    }

    /// Run until `filter` stops execution.
    ///
    /// Forward runs also stop on an interrupt and at the end of the recording;
    /// with `require_stop` reaching the end is an error instead and the position
    /// is left unchanged. Backward runs fail when nothing before the current
    /// point stops.
    pub fn run(
        &mut self,
        direction: Direction,
        filter: &dyn StopFilter,
        require_stop: bool,
    ) -> Result<Stop> {
        let from = self.vm.progress();
        let stop = match direction {
            Direction::Forward => self.run_forward(filter, require_stop),
            Direction::Backward => self.run_backward(filter),
        };
        match &stop {
            Ok(stop) => tracing::debug!(
                target: "retrace.engine",
                ?direction,
                from,
                to = stop.position.progress,
                reason = stop.reason.as_str(),
                "run finished"
            ),
            Err(err) => tracing::debug!(
                target: "retrace.engine",
                ?direction,
                from,
                error = %err,
                "run failed"
            ),
        }
        stop
    }

    fn run_forward(&mut self, filter: &dyn StopFilter, require_stop: bool) -> Result<Stop> {
        let origin = self.vm.clone();
        let live = self.is_live();
        let cutoff = self.truncated_end();
        let mut io = RecordingIo::new(&self.recording, live);

        let outcome = loop {
            if cutoff.is_some_and(|end| self.vm.progress() >= end) {
                break Ok(None);
            }
            let event =
                match next_site(&self.program, &mut self.vm, &mut io, &mut self.checkpoints) {
                    Ok(Some(event)) => event,
                    Ok(None) => break Ok(None),
                    Err(err) => break Err(err),
                };
            if let Err(err) = self.faults.check(event.progress) {
                break Err(err);
            }
            if self.interrupt.load(Ordering::Acquire) {
                break Ok(Some(StopReason::Interrupted));
            }
            let site = SiteContext::new(&event, &self.vm, &self.program, self.options.eval_budget);
            if let Some(reason) = filter.check(&site) {
                break Ok(Some(reason));
            }
        };
        self.sync_recording(live);

        match outcome {
            Ok(Some(reason)) => Ok(self.stop(reason)),
            Ok(None) if require_stop => {
                self.vm = origin;
                Err(EngineError::NoFutureOccurrence)
            }
            Ok(None) => Ok(self.stop(StopReason::Finished)),
            Err(err) => {
                self.vm = origin;
                Err(err)
            }
        }
    }

    fn run_backward(&mut self, filter: &dyn StopFilter) -> Result<Stop> {
        let current = self.vm.progress();
        // From the end the last site itself is still ahead of us going backward.
        let upper = if self.vm.is_finished() {
            current + 1
        } else {
            current
        };
        let live = self.is_live();

        let mut segment_end = upper;
        for start in self.checkpoints.before(upper) {
            let Some(mut vm) = self.checkpoints.get(start).cloned() else {
                continue;
            };
            let mut io = RecordingIo::new(&self.recording, live);
            let mut found = None;
            while let Some(event) = next_site(&self.program, &mut vm, &mut io, &mut self.checkpoints)? {
                if event.progress >= segment_end {
                    break;
                }
                let site = SiteContext::new(&event, &vm, &self.program, self.options.eval_budget);
                if let Some(reason) = filter.check(&site) {
                    found = Some((vm.clone(), reason));
                }
            }
            if let Some((vm, reason)) = found {
                self.vm = vm;
                return Ok(self.stop(reason));
            }
            // The checkpoint's own site belongs to the interval before it.
            segment_end = start + 1;
        }
        Err(EngineError::NoPriorOccurrence)
    }

    /// Jump to an exact execution point inside the recording.
    pub fn warp(&mut self, target: u64) -> Result<Stop> {
        if target == 0 {
            return Err(EngineError::NoPriorOccurrence);
        }
        if target > self.end_point() {
            return Err(EngineError::NoFutureOccurrence);
        }
        self.seek(target)?;
        Ok(self.stop(StopReason::TimeWarp))
    }

    /// Put this engine at `point`, typically after a relaunch.
    pub fn restore(&mut self, point: SeekPoint) -> Result<Position> {
        if point.finished {
            self.seek_end()?;
        } else if point.progress > 0 {
            self.seek(point.progress)?;
        }
        Ok(self.position())
    }

    pub fn evaluate(
        &self,
        depth: usize,
        source: &str,
        filter: Option<&dyn StopFilter>,
    ) -> Result<Evaluation> {
        let evaluation = vm::evaluate(
            &self.vm,
            &self.program,
            depth,
            source,
            filter,
            self.options.eval_budget,
        );
        if let Err(err) = &evaluation {
            tracing::debug!(target: "retrace.engine", depth, error = %err, "evaluation failed");
        }
        evaluation
    }

    /// Finish a live recording at its frontier. Returns the end point.
    pub fn end_recording(&mut self) -> Result<u64> {
        match self.mode {
            Mode::Recording => {
                let end = self.recording.write().truncate();
                tracing::info!(target: "retrace.engine", end, "recording ended");
                Ok(end)
            }
            Mode::Replaying => self
                .recording
                .read()
                .end()
                .ok_or(EngineError::RecordingNotFinished),
        }
    }

    pub(crate) fn handle(&mut self, request: ChildRequest) -> Result<ChildReply> {
        match request {
            ChildRequest::Attach => self.attach().map(ChildReply::Stopped),
            ChildRequest::Run {
                direction,
                filter,
                require_stop,
            } => self
                .run(direction, &*filter, require_stop)
                .map(ChildReply::Stopped),
            ChildRequest::Warp { target } => self.warp(target).map(ChildReply::Stopped),
            ChildRequest::Restore(point) => self.restore(point).map(ChildReply::Position),
            ChildRequest::Evaluate {
                depth,
                source,
                filter,
            } => self
                .evaluate(depth, &source, filter.as_deref())
                .map(ChildReply::Evaluated),
            ChildRequest::Position => Ok(ChildReply::Position(self.position())),
            ChildRequest::Checkpoints => Ok(ChildReply::Checkpoints(self.checkpoints())),
            ChildRequest::EndRecording => self.end_recording().map(ChildReply::Ended),
        }
    }

    fn seek(&mut self, target: u64) -> Result<()> {
        if self.vm.progress() == target && !self.vm.is_finished() {
            return Ok(());
        }
        let origin = self.vm.clone();
        if self.vm.is_finished() || self.vm.progress() > target {
            match self.checkpoints.at_or_before(target) {
                Some(state) => self.vm = state.clone(),
                None => return Err(EngineError::NoPriorOccurrence),
            }
        }

        let live = self.is_live();
        let mut io = RecordingIo::new(&self.recording, live);
        let mut reached = Ok(());
        while self.vm.progress() < target {
            match next_site(&self.program, &mut self.vm, &mut io, &mut self.checkpoints) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    reached = Err(EngineError::NoFutureOccurrence);
                    break;
                }
                Err(err) => {
                    reached = Err(err);
                    break;
                }
            }
        }
        self.sync_recording(live);
        if reached.is_err() {
            self.vm = origin;
        }
        reached
    }

    fn seek_end(&mut self) -> Result<()> {
        if let Some(end) = self.truncated_end() {
            return self.seek(end);
        }
        let live = self.is_live();
        let mut io = RecordingIo::new(&self.recording, live);
        let result = loop {
            match next_site(&self.program, &mut self.vm, &mut io, &mut self.checkpoints) {
                Ok(Some(_)) => {}
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        self.sync_recording(live);
        result
    }

    fn stop(&self, reason: StopReason) -> Stop {
        Stop {
            reason,
            position: self.position(),
        }
    }

    fn is_live(&self) -> bool {
        self.mode == Mode::Recording && !self.recording.read().is_finished()
    }

    fn truncated_end(&self) -> Option<u64> {
        let recording = self.recording.read();
        if recording.is_truncated() {
            recording.end()
        } else {
            None
        }
    }

    fn end_point(&self) -> u64 {
        let recording = self.recording.read();
        recording.end().unwrap_or(recording.frontier())
    }

    fn sync_recording(&self, live: bool) {
        if !live {
            return;
        }
        let mut recording = self.recording.write();
        recording.advance_frontier(self.vm.progress());
        if self.vm.is_finished() {
            recording.complete(self.vm.progress());
            tracing::info!(
                target: "retrace.engine",
                end = self.vm.progress(),
                "recording finished"
            );
        }
    }
}

fn next_site(
    program: &Program,
    vm: &mut VmState,
    io: &mut RecordingIo<'_>,
    checkpoints: &mut CheckpointStore,
) -> Result<Option<SiteEvent>> {
    match vm.exec(program, io, None, None)? {
        Exec::Site(event) => {
            checkpoints.note(vm);
            Ok(Some(event))
        }
        Exec::Idle | Exec::Returned(_) | Exec::Threw(_) => Ok(None),
    }
}

/// Inputs are read back from the recording by index. Only a live recording may
/// produce new ones.
struct RecordingIo<'a> {
    recording: &'a SharedRecording,
    live: bool,
}

impl<'a> RecordingIo<'a> {
    fn new(recording: &'a SharedRecording, live: bool) -> Self {
        Self { recording, live }
    }
}

impl VmIo for RecordingIo<'_> {
    fn input(&mut self, kind: InputKind, index: u64) -> Result<f64> {
        let mut recording = self.recording.write();
        if let Some(input) = recording.input(index) {
            return if input.kind == kind {
                Ok(input.value)
            } else {
                Err(EngineError::Divergence(kind))
            };
        }
        if !self.live {
            return Err(EngineError::Divergence(kind));
        }
        let value = match kind {
            InputKind::Random => rand::random::<f64>(),
            InputKind::Now => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_millis() as f64)
                .unwrap_or(0.0),
        };
        recording.push_input(kind, value);
        Ok(value)
    }

    fn console(&mut self, index: u64, level: ConsoleLevel, text: String, progress: u64) {
        if self.live {
            self.recording.write().push_console(
                index,
                ConsoleMessage {
                    level,
                    text,
                    execution_point: progress,
                },
            );
        }
    }
}
