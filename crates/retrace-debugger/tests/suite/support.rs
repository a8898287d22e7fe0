use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use retrace_config::RetraceConfig;
use retrace_engine::FaultPlan;
use retrace_protocol::{ClientError, DebuggerClient, PausedPacket, ThreadFront};
use serde_json::Value;

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

const TIMEOUT: Duration = Duration::from_secs(20);

pub fn config() -> RetraceConfig {
    let mut config = RetraceConfig::default();
    config.replay.checkpoint_interval = 4;
    config.evaluation.max_steps = 10_000;
    config
}

/// A client wired to an in-process server over an in-memory pipe.
pub fn connect() -> DebuggerClient {
    connect_with(config(), FaultPlan::none())
}

pub fn connect_with(config: RetraceConfig, faults: FaultPlan) -> DebuggerClient {
    let (client_side, server_side) = tokio::io::duplex(256 * 1024);
    let (client_read, client_write) = tokio::io::split(client_side);
    let (server_read, server_write) = tokio::io::split(server_side);
    tokio::spawn(retrace_debugger::run_with_faults(
        server_read,
        server_write,
        Arc::new(config),
        faults,
    ));
    DebuggerClient::connect(client_read, client_write)
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(TIMEOUT, future)
        .await
        .expect("timed out waiting for the server")
}

pub async fn start(client: &DebuggerClient, source: &str) -> (ThreadFront, PausedPacket) {
    within(client.start_recording(URL, source)).await.unwrap()
}

/// Start recording `source` and run it to the end.
pub async fn finished(client: &DebuggerClient, source: &str) -> ThreadFront {
    let (mut front, _) = start(client, source).await;
    let end = within(front.resume()).await.unwrap();
    assert_eq!(end.why.kind, "finished");
    front
}

pub async fn eval(front: &ThreadFront, expression: &str) -> Value {
    let evaluation = within(front.evaluate(expression)).await.unwrap();
    match evaluation.result {
        Some(value) => value,
        None => panic!("`{expression}` threw {:?}", evaluation.exception),
    }
}

pub fn code(err: &ClientError) -> &str {
    err.code().unwrap_or("<none>")
}
