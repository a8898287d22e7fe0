use std::path::Path;

use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::client::{ClientError, DebuggerClient, Result};
use crate::packet::{packet_from, packet_type, ActorId};
use crate::types::{
    BreakpointForm, CheckpointForm, ConsoleMessageForm, EvaluationForm, FrameForm, PausedPacket,
    SourceLocation,
};

/// Typed handle on one thread actor.
///
/// The front subscribes to events when it is created, so the `paused` event that
/// precedes a movement reply is never missed.
#[derive(Debug)]
pub struct ThreadFront {
    client: DebuggerClient,
    actor: ActorId,
    events: broadcast::Receiver<Value>,
}

impl Clone for ThreadFront {
    fn clone(&self) -> Self {
        ThreadFront::new(self.client.clone(), self.actor.clone())
    }
}

impl ThreadFront {
    pub fn new(client: DebuggerClient, actor: ActorId) -> Self {
        let events = client.subscribe();
        Self {
            client,
            actor,
            events,
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn client(&self) -> &DebuggerClient {
        &self.client
    }

    pub async fn request(&self, kind: &str, args: Value) -> Result<Value> {
        self.client.request(&self.actor, kind, args).await
    }

    async fn request_field<T: serde::de::DeserializeOwned>(
        &self,
        kind: &str,
        args: Value,
        field: &str,
    ) -> Result<T> {
        self.client
            .request_field(&self.actor, kind, args, field)
            .await
    }

    /// Wait for the next `paused` event from this thread.
    pub async fn next_paused(&mut self) -> Result<PausedPacket> {
        loop {
            let event = match self.events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(target: "retrace.protocol", skipped, "event receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ClientError::ConnectionClosed)
                }
            };
            if packet_from(&event) != Some(self.actor.as_str()) {
                continue;
            }
            match packet_type(&event) {
                Some("paused") => {
                    return serde_json::from_value(event).map_err(|err| ClientError::Decode {
                        actor: self.actor.clone(),
                        message: err.to_string(),
                    })
                }
                Some("fatalError") => {
                    let message = event
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned();
                    return Err(ClientError::Server {
                        actor: self.actor.clone(),
                        code: "fatalError".to_owned(),
                        message,
                    });
                }
                _ => continue,
            }
        }
    }

    /// Send a movement command and return the pause it ended in.
    async fn travel(&mut self, kind: &str, args: Value) -> Result<PausedPacket> {
        self.request(kind, args).await?;
        self.next_paused().await
    }

    pub async fn set_breakpoint(
        &self,
        url: &str,
        line: u32,
        column: Option<u32>,
        condition: Option<&str>,
    ) -> Result<BreakpointForm> {
        let location = SourceLocation {
            url: url.to_owned(),
            line,
            column,
        };
        self.request_field(
            "setBreakpoint",
            json!({"location": location, "condition": condition}),
            "breakpoint",
        )
        .await
    }

    pub async fn remove_breakpoint(&self, id: u32) -> Result<()> {
        self.request("removeBreakpoint", json!({"breakpoint": id}))
            .await
            .map(drop)
    }

    pub async fn set_breakpoint_enabled(&self, id: u32, enabled: bool) -> Result<()> {
        self.request(
            "setBreakpointEnabled",
            json!({"breakpoint": id, "enabled": enabled}),
        )
        .await
        .map(drop)
    }

    pub async fn list_breakpoints(&self) -> Result<Vec<BreakpointForm>> {
        self.request_field("listBreakpoints", Value::Null, "breakpoints")
            .await
    }

    pub async fn pause_on_exceptions(&self, enabled: bool) -> Result<()> {
        self.request("pauseOnExceptions", json!({"pauseOnExceptions": enabled}))
            .await
            .map(drop)
    }

    pub async fn skip_breakpoints(&self, skip: bool) -> Result<()> {
        self.request("skipBreakpoints", json!({"skip": skip}))
            .await
            .map(drop)
    }

    pub async fn resume(&mut self) -> Result<PausedPacket> {
        self.travel("resume", Value::Null).await
    }

    pub async fn rewind(&mut self) -> Result<PausedPacket> {
        self.travel("rewind", Value::Null).await
    }

    pub async fn step_over(&mut self) -> Result<PausedPacket> {
        self.travel("stepOver", Value::Null).await
    }

    pub async fn step_in(&mut self) -> Result<PausedPacket> {
        self.travel("stepIn", Value::Null).await
    }

    pub async fn step_out(&mut self) -> Result<PausedPacket> {
        self.travel("stepOut", Value::Null).await
    }

    pub async fn reverse_step_over(&mut self) -> Result<PausedPacket> {
        self.travel("reverseStepOver", Value::Null).await
    }

    pub async fn reverse_step_in(&mut self) -> Result<PausedPacket> {
        self.travel("reverseStepIn", Value::Null).await
    }

    pub async fn reverse_step_out(&mut self) -> Result<PausedPacket> {
        self.travel("reverseStepOut", Value::Null).await
    }

    pub async fn rewind_to_line(&mut self, line: u32) -> Result<PausedPacket> {
        self.travel("rewindToLine", json!({"line": line})).await
    }

    pub async fn resume_to_line(&mut self, line: u32) -> Result<PausedPacket> {
        self.travel("resumeToLine", json!({"line": line})).await
    }

    pub async fn time_warp(&mut self, execution_point: u64) -> Result<PausedPacket> {
        self.travel("timeWarp", json!({"target": execution_point}))
            .await
    }

    pub async fn interrupt(&self) -> Result<()> {
        self.request("interrupt", Value::Null).await.map(drop)
    }

    pub async fn detach(&self) -> Result<()> {
        self.request("detach", Value::Null).await.map(drop)
    }

    /// Evaluate in the youngest frame.
    pub async fn evaluate(&self, expression: &str) -> Result<EvaluationForm> {
        self.evaluate_in_frame(expression, 0).await
    }

    pub async fn evaluate_in_frame(&self, expression: &str, frame: usize) -> Result<EvaluationForm> {
        let reply = self
            .request("evaluate", json!({"expression": expression, "frame": frame}))
            .await?;
        serde_json::from_value(reply).map_err(|err| ClientError::Decode {
            actor: self.actor.clone(),
            message: err.to_string(),
        })
    }

    pub async fn frames(&self) -> Result<Vec<FrameForm>> {
        self.request_field("frames", Value::Null, "frames").await
    }

    pub async fn checkpoints(&self) -> Result<Vec<CheckpointForm>> {
        self.request_field("checkpoints", Value::Null, "checkpoints")
            .await
    }

    pub async fn console_messages(&self) -> Result<Vec<ConsoleMessageForm>> {
        self.request_field("consoleMessages", Value::Null, "messages")
            .await
    }

    pub async fn end_recording(&self) -> Result<()> {
        self.request("endRecording", Value::Null).await.map(drop)
    }

    pub async fn save_recording(&self, path: &Path) -> Result<()> {
        self.request(
            "saveRecording",
            json!({"path": path.display().to_string()}),
        )
        .await
        .map(drop)
    }

    pub async fn dump(&self) -> Result<Value> {
        self.request("dumpThread", Value::Null).await
    }
}
