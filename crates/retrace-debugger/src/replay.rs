//! Owns a target's child process and keeps it alive across crashes.
//!
//! While replaying, a crashed child is relaunched from the recording, moved back
//! to the last position the thread was paused at, and the failed request is
//! sent again. Breakpoints travel with each request, so nothing else needs to
//! be reinstalled.

use retrace_config::ReplayConfig;
use retrace_engine::{
    ChildLaunch, ChildProcess, ChildReply, ChildRequest, EngineError, Mode, SeekPoint,
    SharedRecording, Stop,
};

use crate::error::{DebuggerError, Result};

pub struct ReplayController {
    launch: ChildLaunch,
    config: ReplayConfig,
    child: Option<ChildProcess>,
    last_position: SeekPoint,
    restarts: u32,
    fatal: bool,
}

impl ReplayController {
    pub fn spawn(launch: ChildLaunch, config: ReplayConfig) -> Result<Self> {
        let child = ChildProcess::spawn(launch.clone())?;
        Ok(Self {
            launch,
            config,
            child: Some(child),
            last_position: SeekPoint::default(),
            restarts: 0,
            fatal: false,
        })
    }

    pub fn mode(&self) -> Mode {
        self.launch.mode
    }

    pub fn recording(&self) -> &SharedRecording {
        &self.launch.recording
    }

    pub fn url(&self) -> &str {
        self.launch.program.url()
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Set once the target has been torn down; every later request fails.
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Attach to the child and return where the target starts out paused.
    pub async fn attach(&mut self) -> Result<Stop> {
        match self.request(ChildRequest::Attach).await? {
            ChildReply::Stopped(stop) => Ok(stop),
            other => Err(unexpected_reply("attach", &other)),
        }
    }

    pub async fn request(&mut self, request: ChildRequest) -> Result<ChildReply> {
        if self.fatal {
            return Err(DebuggerError::Detached);
        }

        let mut crashes = 0;
        loop {
            let result = match &self.child {
                Some(child) => child.request(request.clone()).await,
                None => Err(EngineError::ChildProcessCrashed),
            };
            match result {
                Ok(reply) => {
                    if let ChildReply::Stopped(stop) = &reply {
                        self.last_position = stop.position.seek_point();
                    }
                    return Ok(reply);
                }
                Err(EngineError::ChildProcessCrashed) => {
                    crashes += 1;
                    self.child = None;
                    tracing::warn!(
                        target: "retrace.debugger",
                        mode = self.mode().as_str(),
                        crashes,
                        restarts = self.restarts,
                        "child process crashed"
                    );
                    self.recover(crashes).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Relaunch after `crashes` crashes in a row, or give up on the target.
    ///
    /// The first crash is the one being recovered from; every later one means
    /// a recovery failed. The target is torn down once
    /// `max_consecutive_failures` recoveries have failed in a row.
    async fn recover(&mut self, mut crashes: u32) -> Result<()> {
        loop {
            if self.mode() != Mode::Replaying
                || !self.config.restart_enabled
                || self.restarts >= self.config.max_restarts
            {
                self.fatal = true;
                return Err(EngineError::ChildProcessCrashed.into());
            }
            let failed_recoveries = crashes.saturating_sub(1);
            if failed_recoveries >= self.config.max_consecutive_failures {
                self.fatal = true;
                return Err(DebuggerError::Fatal(format!(
                    "recovery failed {failed_recoveries} times in a row; giving up on the target"
                )));
            }

            self.restarts += 1;
            let child = ChildProcess::spawn(self.launch.clone())?;
            tracing::info!(
                target: "retrace.debugger",
                child = child.id(),
                restarts = self.restarts,
                progress = self.last_position.progress,
                "relaunched child process"
            );
            match child.request(ChildRequest::Restore(self.last_position)).await {
                Ok(_) => {
                    self.child = Some(child);
                    return Ok(());
                }
                Err(EngineError::ChildProcessCrashed) => crashes += 1,
                Err(err) => {
                    self.fatal = true;
                    return Err(err.into());
                }
            }
        }
    }

    /// Drop the child; its thread exits once the request channel closes.
    pub fn shutdown(&mut self) {
        self.child = None;
        self.fatal = true;
    }
}

pub(crate) fn unexpected_reply(request: &str, reply: &ChildReply) -> DebuggerError {
    DebuggerError::Fatal(format!("unexpected child reply to {request}: {reply:?}"))
}
