//! The child process: one engine on a dedicated OS thread.
//!
//! The debugger never touches an [`Engine`] directly. It sends
//! [`ChildRequest`]s and awaits the replies. A child that aborts or panics
//! stops answering; every request it has not answered, and every later one,
//! fails with [`EngineError::ChildProcessCrashed`].

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::bytecode::Program;
use crate::checkpoint::CheckpointInfo;
use crate::engine::{Direction, Engine, EngineOptions, Mode, Position, SeekPoint, Stop};
use crate::error::{EngineError, Result};
use crate::fault::FaultPlan;
use crate::recording::SharedRecording;
use crate::stop::StopFilter;
use crate::vm::Evaluation;

static NEXT_CHILD_ID: AtomicU64 = AtomicU64::new(1);

/// Everything a child needs to start executing.
#[derive(Clone)]
pub struct ChildLaunch {
    pub program: Arc<Program>,
    pub recording: SharedRecording,
    pub mode: Mode,
    pub options: EngineOptions,
    /// Checked at every execution site of a forward run.
    pub interrupt: Arc<AtomicBool>,
    pub faults: FaultPlan,
}

#[derive(Clone)]
pub enum ChildRequest {
    Attach,
    Run {
        direction: Direction,
        filter: Arc<dyn StopFilter>,
        require_stop: bool,
    },
    Warp {
        target: u64,
    },
    Restore(SeekPoint),
    Evaluate {
        depth: usize,
        source: String,
        filter: Option<Arc<dyn StopFilter>>,
    },
    Position,
    Checkpoints,
    EndRecording,
}

impl fmt::Debug for ChildRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildRequest::Attach => f.write_str("Attach"),
            ChildRequest::Run {
                direction,
                require_stop,
                ..
            } => f
                .debug_struct("Run")
                .field("direction", direction)
                .field("require_stop", require_stop)
                .finish_non_exhaustive(),
            ChildRequest::Warp { target } => f.debug_struct("Warp").field("target", target).finish(),
            ChildRequest::Restore(point) => f.debug_tuple("Restore").field(point).finish(),
            ChildRequest::Evaluate { depth, source, .. } => f
                .debug_struct("Evaluate")
                .field("depth", depth)
                .field("source", source)
                .finish_non_exhaustive(),
            ChildRequest::Position => f.write_str("Position"),
            ChildRequest::Checkpoints => f.write_str("Checkpoints"),
            ChildRequest::EndRecording => f.write_str("EndRecording"),
        }
    }
}

#[derive(Debug)]
pub enum ChildReply {
    Stopped(Stop),
    Evaluated(Evaluation),
    Position(Position),
    Checkpoints(Vec<CheckpointInfo>),
    Ended(u64),
}

struct Envelope {
    request: ChildRequest,
    reply: oneshot::Sender<Result<ChildReply>>,
}

pub struct ChildProcess {
    id: u64,
    requests: mpsc::UnboundedSender<Envelope>,
}

impl ChildProcess {
    pub fn spawn(launch: ChildLaunch) -> Result<Self> {
        let id = NEXT_CHILD_ID.fetch_add(1, Ordering::Relaxed);
        let (requests, inbox) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name(format!("retrace-child-{id}"))
            .spawn(move || child_main(id, launch, inbox))?;
        tracing::debug!(target: "retrace.child", id, "child launched");
        Ok(Self { id, requests })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        !self.requests.is_closed()
    }

    pub async fn request(&self, request: ChildRequest) -> Result<ChildReply> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Envelope { request, reply })
            .map_err(|_| EngineError::ChildProcessCrashed)?;
        response
            .await
            .map_err(|_| EngineError::ChildProcessCrashed)?
    }
}

impl fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildProcess")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

fn child_main(id: u64, launch: ChildLaunch, mut inbox: mpsc::UnboundedReceiver<Envelope>) {
    let mode = launch.mode;
    let mut engine = Engine::new(launch);
    tracing::debug!(target: "retrace.child", id, mode = mode.as_str(), "child started");

    while let Some(Envelope { request, reply }) = inbox.blocking_recv() {
        tracing::trace!(target: "retrace.child", id, ?request, "child request");
        match panic::catch_unwind(AssertUnwindSafe(|| engine.handle(request))) {
            Ok(Err(EngineError::Aborted)) => {
                tracing::warn!(target: "retrace.child", id, "child aborted");
                return;
            }
            Ok(result) => {
                // The requester may have given up; that is not the child's problem.
                let _ = reply.send(result);
            }
            Err(_) => {
                tracing::error!(target: "retrace.child", id, "child panicked");
                return;
            }
        }
    }
    tracing::debug!(target: "retrace.child", id, "child exited");
}
