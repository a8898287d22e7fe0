//! Thread actors.
//!
//! Each target is served by one tokio task that owns its [`ReplayController`]
//! and its breakpoints. Requests arrive through an mpsc mailbox and are
//! answered strictly in order. The only thing the session touches directly is
//! the interrupt flag, which lets `interrupt` and `detach` cut a running or
//! queued movement short.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use retrace_engine::{BreakpointId, ChildReply, ChildRequest, Mode, Stop, StopFilter};
use retrace_protocol::{
    make_error, make_event, make_response, ActorId, BreakpointForm, Request, ThreadForm,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::breakpoints::{Breakpoint, BreakpointStore};
use crate::dispatch::{self, Motion, ThreadRequest, THREAD_COMMANDS};
use crate::error::{DebuggerError, Result};
use crate::filter::{PauseOptions, StepLimit, ThreadStopFilter};
use crate::packets;
use crate::replay::{unexpected_reply, ReplayController};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Paused,
    Stepping,
    Detached,
}

impl ThreadState {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadState::Running => "running",
            ThreadState::Paused => "paused",
            ThreadState::Stepping => "stepping",
            ThreadState::Detached => "detached",
        }
    }

    fn is_moving(self) -> bool {
        matches!(self, ThreadState::Running | ThreadState::Stepping)
    }
}

#[derive(Debug)]
pub(crate) enum Mail {
    Request(Request),
    /// `preempted` is whether the session found a movement running or queued
    /// and raised the interrupt flag.
    Interrupt { preempted: bool },
}

/// The interrupt flag the child polls, and the movements it may apply to.
///
/// The count and the flag change together under one lock, so an interrupt is
/// either taken by a pending movement or refused, and a finished movement
/// never leaves the flag raised for the next one.
#[derive(Debug)]
pub(crate) struct Preemption {
    flag: Arc<AtomicBool>,
    /// Movements routed to the actor and not yet answered.
    pending: Mutex<usize>,
}

impl Preemption {
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self {
            flag,
            pending: Mutex::new(0),
        }
    }

    pub fn queue_move(&self) {
        *self.pending.lock() += 1;
    }

    /// Raise the flag if a movement is running or queued. Returns whether one
    /// was.
    pub fn preempt(&self) -> bool {
        let pending = self.pending.lock();
        if *pending > 0 {
            self.flag.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    pub fn finish_move(&self) {
        let mut pending = self.pending.lock();
        self.flag.store(false, Ordering::Release);
        *pending = pending.saturating_sub(1);
    }

    /// Raise the flag unconditionally; the actor is going away.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[cfg(test)]
    fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// The session's handle on a running thread actor.
#[derive(Debug)]
pub(crate) struct ThreadHandle {
    actor: ActorId,
    url: String,
    mode: Mode,
    mailbox: mpsc::UnboundedSender<Mail>,
    state: watch::Receiver<ThreadState>,
    preemption: Arc<Preemption>,
}

impl ThreadHandle {
    pub fn state(&self) -> ThreadState {
        *self.state.borrow()
    }

    pub fn form(&self) -> ThreadForm {
        ThreadForm {
            actor: self.actor.clone(),
            url: self.url.clone(),
            mode: self.mode.as_str().to_owned(),
            state: self.state().as_str().to_owned(),
        }
    }

    pub fn preempt(&self) -> bool {
        self.preemption.preempt()
    }

    pub fn queue_move(&self) {
        self.preemption.queue_move();
    }

    pub fn send(&self, mail: Mail) -> bool {
        self.mailbox.send(mail).is_ok()
    }

    pub fn stop(&self) {
        self.preemption.stop();
    }
}

pub(crate) struct ThreadSpawn {
    pub actor: ActorId,
    pub controller: ReplayController,
    pub options: PauseOptions,
    pub interrupt: Arc<AtomicBool>,
    pub paused: Stop,
    pub outgoing: mpsc::UnboundedSender<Value>,
    pub shutdown: CancellationToken,
}

pub(crate) fn spawn(init: ThreadSpawn) -> ThreadHandle {
    let (mailbox, inbox) = mpsc::unbounded_channel();
    let (state_tx, state) = watch::channel(ThreadState::Paused);
    let handle = ThreadHandle {
        actor: init.actor.clone(),
        url: init.controller.url().to_owned(),
        mode: init.controller.mode(),
        mailbox,
        state,
        preemption: Arc::new(Preemption::new(init.interrupt)),
    };

    let actor = ThreadActor {
        actor: init.actor,
        controller: init.controller,
        breakpoints: BreakpointStore::default(),
        options: init.options,
        paused: init.paused,
        state: state_tx,
        preemption: handle.preemption.clone(),
        outgoing: init.outgoing,
    };
    tokio::spawn(actor.run(inbox, init.shutdown));
    handle
}

struct ThreadActor {
    actor: ActorId,
    controller: ReplayController,
    breakpoints: BreakpointStore,
    options: PauseOptions,
    paused: Stop,
    state: watch::Sender<ThreadState>,
    preemption: Arc<Preemption>,
    outgoing: mpsc::UnboundedSender<Value>,
}

impl ThreadActor {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Mail>, shutdown: CancellationToken) {
        tracing::debug!(target: "retrace.debugger", actor = %self.actor, "thread actor started");
        loop {
            let mail = tokio::select! {
                _ = shutdown.cancelled() => break,
                mail = inbox.recv() => match mail {
                    Some(mail) => mail,
                    None => break,
                },
            };
            match mail {
                Mail::Interrupt { preempted } => {
                    let result = if self.state() == ThreadState::Detached {
                        Err(DebuggerError::Detached)
                    } else if preempted {
                        Ok(json!({}))
                    } else {
                        Err(DebuggerError::NotRunning)
                    };
                    self.reply("interrupt", result);
                }
                Mail::Request(request) => {
                    let kind = request.kind.clone();
                    let result = self.handle(request).await;
                    if dispatch::is_movement(&kind) {
                        self.preemption.finish_move();
                    }
                    self.finish(&kind, result);
                }
            }
        }
        self.controller.shutdown();
        tracing::debug!(target: "retrace.debugger", actor = %self.actor, "thread actor stopped");
    }

    fn state(&self) -> ThreadState {
        *self.state.borrow()
    }

    fn url(&self) -> &str {
        self.controller.url()
    }

    async fn handle(&mut self, request: Request) -> Result<Value> {
        if self.state() == ThreadState::Detached {
            return Err(DebuggerError::Detached);
        }
        let request: ThreadRequest = dispatch::parse(request, THREAD_COMMANDS)?;
        if let Some(motion) = request.motion() {
            return self.travel(motion).await;
        }
        self.execute(request).await
    }

    /// Settle the state after a request and send its response. A request that
    /// left the controller torn down detaches the thread and announces it.
    fn finish(&mut self, kind: &str, result: Result<Value>) {
        if let Err(err) = &result {
            if self.controller.is_fatal() && self.state() != ThreadState::Detached {
                self.state.send_replace(ThreadState::Detached);
                let message = err.to_string();
                tracing::error!(
                    target: "retrace.debugger",
                    actor = %self.actor,
                    %message,
                    "target torn down"
                );
                self.send(make_event(
                    &self.actor,
                    "fatalError",
                    json!({ "message": message }),
                ));
            } else if self.state().is_moving() {
                self.state.send_replace(ThreadState::Paused);
            }
        }
        self.reply(kind, result);
    }

    fn reply(&self, kind: &str, result: Result<Value>) {
        let packet = match result {
            Ok(body) => make_response(&self.actor, body),
            Err(err) => {
                tracing::debug!(
                    target: "retrace.debugger",
                    actor = %self.actor,
                    kind,
                    error = %err,
                    "request failed"
                );
                make_error(&self.actor, err.error_code(), err.to_string())
            }
        };
        self.send(packet);
    }

    fn send(&self, packet: Value) {
        let _ = self.outgoing.send(packet);
    }

    fn filter(&self) -> ThreadStopFilter {
        ThreadStopFilter::new(self.breakpoints.snapshot(), self.options)
    }

    fn child_request(&self, motion: Motion) -> ChildRequest {
        let (direction, filter, require_stop) = match motion {
            Motion::Run(direction) => (direction, self.filter(), false),
            Motion::Step(direction, kind) => {
                let step = StepLimit::new(kind, &self.paused.position.frames);
                (direction, self.filter().with_step(step), false)
            }
            Motion::ToLine(direction, line) => (direction, self.filter().with_line(line), true),
            Motion::Warp(target) => return ChildRequest::Warp { target },
        };
        ChildRequest::Run {
            direction,
            filter: Arc::new(filter),
            require_stop,
        }
    }

    /// Run a movement, then announce the new pause ahead of the `resumed`
    /// response. A failed movement leaves the previous pause in place.
    async fn travel(&mut self, motion: Motion) -> Result<Value> {
        if self.state() != ThreadState::Paused {
            return Err(DebuggerError::NotPaused);
        }
        let request = self.child_request(motion);
        let moving = match motion {
            Motion::Step(..) => ThreadState::Stepping,
            _ => ThreadState::Running,
        };
        self.state.send_replace(moving);

        let stop = match self.controller.request(request).await? {
            ChildReply::Stopped(stop) => stop,
            other => return Err(unexpected_reply("a movement", &other)),
        };
        self.paused = stop;
        self.state.send_replace(ThreadState::Paused);
        self.send(make_event(
            &self.actor,
            "paused",
            packets::paused_body(&self.paused, self.url()),
        ));
        Ok(json!({ "type": "resumed" }))
    }

    async fn execute(&mut self, request: ThreadRequest) -> Result<Value> {
        match request {
            ThreadRequest::SetBreakpoint {
                location,
                condition,
            } => {
                let id = self
                    .breakpoints
                    .edit(|table| table.set(location.into(), condition));
                let form = self.breakpoints.table().get(id).map(Breakpoint::to_form);
                tracing::debug!(target: "retrace.debugger", actor = %self.actor, id = id.0, "breakpoint set");
                Ok(json!({ "breakpoint": form }))
            }
            ThreadRequest::RemoveBreakpoint { breakpoint } => {
                self.breakpoints
                    .edit(|table| table.remove(BreakpointId(breakpoint)));
                Ok(json!({}))
            }
            ThreadRequest::SetBreakpointEnabled {
                breakpoint,
                enabled,
            } => {
                self.breakpoints
                    .edit(|table| table.set_enabled(BreakpointId(breakpoint), enabled))?;
                Ok(json!({}))
            }
            ThreadRequest::ListBreakpoints => Ok(json!({ "breakpoints": self.breakpoint_forms() })),
            ThreadRequest::PauseOnExceptions { enabled } => {
                self.options.pause_on_exceptions = enabled;
                Ok(json!({}))
            }
            ThreadRequest::SkipBreakpoints { skip } => {
                self.options.skip_breakpoints = skip;
                Ok(json!({}))
            }
            ThreadRequest::Evaluate { expression, frame } => {
                let filter: Arc<dyn StopFilter> = Arc::new(self.filter());
                let request = ChildRequest::Evaluate {
                    depth: frame,
                    source: expression,
                    filter: Some(filter),
                };
                match self.controller.request(request).await? {
                    ChildReply::Evaluated(evaluation) => {
                        Ok(json!(packets::evaluation_form(&evaluation, self.url())))
                    }
                    other => Err(unexpected_reply("evaluate", &other)),
                }
            }
            ThreadRequest::Frames => {
                let frames: Vec<_> = self
                    .paused
                    .position
                    .frames
                    .iter()
                    .map(|frame| packets::frame_form(frame, self.url()))
                    .collect();
                Ok(json!({ "frames": frames }))
            }
            ThreadRequest::Checkpoints => match self.controller.request(ChildRequest::Checkpoints).await? {
                ChildReply::Checkpoints(checkpoints) => {
                    let forms: Vec<_> = checkpoints.iter().map(packets::checkpoint_form).collect();
                    Ok(json!({ "checkpoints": forms }))
                }
                other => Err(unexpected_reply("checkpoints", &other)),
            },
            ThreadRequest::ConsoleMessages => {
                let recording = self.controller.recording().read();
                let messages: Vec<_> = recording
                    .console()
                    .iter()
                    .map(packets::console_message_form)
                    .collect();
                Ok(json!({ "messages": messages }))
            }
            ThreadRequest::EndRecording => match self.controller.request(ChildRequest::EndRecording).await? {
                ChildReply::Ended(end) => Ok(json!({ "executionPoint": end })),
                other => Err(unexpected_reply("endRecording", &other)),
            },
            ThreadRequest::SaveRecording { path } => {
                let recording = self.controller.recording().read().clone();
                recording.save(&path)?;
                tracing::info!(
                    target: "retrace.debugger",
                    actor = %self.actor,
                    path = %path.display(),
                    "recording saved"
                );
                Ok(json!({}))
            }
            ThreadRequest::DumpThread => Ok(self.dump()),
            ThreadRequest::Detach => {
                self.controller.shutdown();
                self.state.send_replace(ThreadState::Detached);
                tracing::info!(target: "retrace.debugger", actor = %self.actor, "detached");
                Ok(json!({ "type": "detached" }))
            }
            // Interrupts arrive as `Mail::Interrupt`; a raw one means the flag
            // was never raised.
            ThreadRequest::Interrupt => Err(DebuggerError::NotRunning),
            ThreadRequest::Resume { .. }
            | ThreadRequest::Rewind
            | ThreadRequest::StepOver
            | ThreadRequest::StepIn
            | ThreadRequest::StepOut
            | ThreadRequest::ReverseStepOver
            | ThreadRequest::ReverseStepIn
            | ThreadRequest::ReverseStepOut
            | ThreadRequest::RewindToLine { .. }
            | ThreadRequest::ResumeToLine { .. }
            | ThreadRequest::TimeWarp { .. } => {
                Err(DebuggerError::Fatal("movement routed past travel".to_owned()))
            }
        }
    }

    fn breakpoint_forms(&self) -> Vec<BreakpointForm> {
        self.breakpoints
            .table()
            .iter()
            .map(Breakpoint::to_form)
            .collect()
    }

    fn dump(&self) -> Value {
        let recording = self.controller.recording().read();
        json!({
            "actor": self.actor,
            "url": self.url(),
            "mode": self.controller.mode().as_str(),
            "state": self.state().as_str(),
            "executionPoint": self.paused.position.progress,
            "finished": self.paused.position.finished,
            "why": packets::why(&self.paused.reason),
            "options": {
                "pauseOnExceptions": self.options.pause_on_exceptions,
                "skipBreakpoints": self.options.skip_breakpoints,
            },
            "breakpoints": self.breakpoint_forms(),
            "recording": {
                "frontier": recording.frontier(),
                "end": recording.end(),
                "inputs": recording.inputs().len(),
                "consoleMessages": recording.console().len(),
            },
            "restarts": self.controller.restarts(),
        })
    }
}
