//! One client connection: the root actor plus the thread actors it created.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use retrace_config::RetraceConfig;
use retrace_engine::{
    ChildLaunch, EngineError, EngineOptions, FaultPlan, Mode, Program, Recording, SharedRecording,
};
use retrace_protocol::{make_error, make_response, ErrorCode, Request, ROOT_ACTOR};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{self, RootRequest, ROOT_COMMANDS};
use crate::error::{DebuggerError, Result};
use crate::filter::PauseOptions;
use crate::packets;
use crate::replay::ReplayController;
use crate::thread::{self, Mail, ThreadHandle, ThreadSpawn};

const THREAD_PREFIX: &str = "thread";

pub(crate) struct Session {
    config: Arc<RetraceConfig>,
    faults: FaultPlan,
    outgoing: mpsc::UnboundedSender<Value>,
    threads: BTreeMap<u64, ThreadHandle>,
    next_thread: u64,
    shutdown: CancellationToken,
}

impl Session {
    pub fn new(
        config: Arc<RetraceConfig>,
        faults: FaultPlan,
        outgoing: mpsc::UnboundedSender<Value>,
    ) -> Self {
        Self {
            config,
            faults,
            outgoing,
            threads: BTreeMap::new(),
            next_thread: 0,
            shutdown: CancellationToken::new(),
        }
    }

    /// Sent by the root actor as soon as a client connects.
    pub fn greeting() -> Value {
        json!({
            "from": ROOT_ACTOR,
            "applicationType": "retrace",
            "traits": {
                "rewind": true,
                "timeWarp": true,
                "consoleMessages": true,
                "saveRecording": true,
            },
        })
    }

    pub fn send(&self, packet: Value) {
        let _ = self.outgoing.send(packet);
    }

    pub async fn handle_packet(&mut self, packet: Value) {
        let request: Request = match serde_json::from_value(packet) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(target: "retrace.debugger", error = %err, "malformed request");
                self.send(make_error(
                    ROOT_ACTOR,
                    ErrorCode::BadParameterType,
                    format!("malformed request: {err}"),
                ));
                return;
            }
        };

        if request.to == ROOT_ACTOR {
            let kind = request.kind.clone();
            let packet = match self.handle_root(request).await {
                Ok(body) => make_response(ROOT_ACTOR, body),
                Err(err) => {
                    tracing::debug!(target: "retrace.debugger", kind, error = %err, "root request failed");
                    make_error(ROOT_ACTOR, err.error_code(), err.to_string())
                }
            };
            self.send(packet);
            return;
        }

        self.route(request);
    }

    fn thread(&self, actor: &str) -> Option<&ThreadHandle> {
        let id = actor.strip_prefix(THREAD_PREFIX)?.parse::<u64>().ok()?;
        self.threads.get(&id)
    }

    /// Hand a request to its thread actor. `interrupt` and `detach` raise the
    /// interrupt flag on the way so they overtake a running movement.
    fn route(&self, request: Request) {
        let Some(thread) = self.thread(&request.to) else {
            let err = DebuggerError::UnknownActor(request.to.clone());
            self.send(make_error(&request.to, err.error_code(), err.to_string()));
            return;
        };

        let actor = request.to.clone();
        let mail = match request.kind.as_str() {
            "interrupt" => Mail::Interrupt {
                preempted: thread.preempt(),
            },
            "detach" => {
                thread.preempt();
                Mail::Request(request)
            }
            kind if dispatch::is_movement(kind) => {
                thread.queue_move();
                Mail::Request(request)
            }
            _ => Mail::Request(request),
        };
        if !thread.send(mail) {
            let err = DebuggerError::Detached;
            self.send(make_error(&actor, err.error_code(), err.to_string()));
        }
    }

    async fn handle_root(&mut self, request: Request) -> Result<Value> {
        match dispatch::parse::<RootRequest>(request, ROOT_COMMANDS)? {
            RootRequest::ListThreads => {
                let threads: Vec<_> = self.threads.values().map(ThreadHandle::form).collect();
                Ok(json!({ "threads": threads }))
            }
            RootRequest::StartRecording { url, source } => {
                let program = Program::compile(&url, &source).map_err(EngineError::from)?;
                let recording = Recording::new(url, source).into_shared();
                self.launch(program, recording, Mode::Recording).await
            }
            RootRequest::LoadRecording { path } => {
                let recording = Recording::load(&path)?;
                let program = Program::compile(recording.url(), recording.source())
                    .map_err(EngineError::from)?;
                self.launch(program, recording.into_shared(), Mode::Replaying)
                    .await
            }
        }
    }

    async fn launch(
        &mut self,
        program: Program,
        recording: SharedRecording,
        mode: Mode,
    ) -> Result<Value> {
        let interrupt = Arc::new(AtomicBool::new(false));
        let launch = ChildLaunch {
            program: Arc::new(program),
            recording,
            mode,
            options: EngineOptions {
                checkpoint_interval: self.config.replay.checkpoint_interval,
                eval_budget: self.config.evaluation.max_steps,
            },
            interrupt: interrupt.clone(),
            faults: self.faults.clone(),
        };
        let mut controller = ReplayController::spawn(launch, self.config.replay.clone())?;
        let paused = controller.attach().await?;

        self.next_thread += 1;
        let actor = format!("{THREAD_PREFIX}{}", self.next_thread);
        let body = json!({
            "actor": actor,
            "paused": packets::paused_body(&paused, controller.url()),
        });
        tracing::info!(
            target: "retrace.debugger",
            %actor,
            url = controller.url(),
            mode = mode.as_str(),
            "thread started"
        );

        let handle = thread::spawn(ThreadSpawn {
            actor,
            controller,
            options: PauseOptions {
                condition_errors: self.config.breakpoints.condition_errors,
                ..PauseOptions::default()
            },
            interrupt,
            paused,
            outgoing: self.outgoing.clone(),
            shutdown: self.shutdown.child_token(),
        });
        self.threads.insert(self.next_thread, handle);
        Ok(body)
    }

    /// Stop every thread actor. Running movements are interrupted first.
    pub fn shutdown(&mut self) {
        for thread in self.threads.values() {
            thread.stop();
        }
        self.shutdown.cancel();
        self.threads.clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
