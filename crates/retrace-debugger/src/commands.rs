//! Offline subcommands of the `retrace` binary.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context as _;
use retrace_config::RetraceConfig;
use retrace_engine::{
    ChildLaunch, Direction, Engine, EngineOptions, FaultPlan, Mode, NeverStop, Program, Recording,
};

/// Run `script` to completion and save its recording to `out`. Returns the
/// end point of the recording.
pub fn record(
    script: &Path,
    out: &Path,
    url: Option<String>,
    config: &RetraceConfig,
) -> anyhow::Result<u64> {
    let source = std::fs::read_to_string(script)
        .with_context(|| format!("failed to read {}", script.display()))?;
    let url = url.unwrap_or_else(|| file_url(script));
    let program = Program::compile(&url, &source)
        .with_context(|| format!("failed to compile {}", script.display()))?;

    let recording = Recording::new(url, source).into_shared();
    let mut engine = Engine::new(ChildLaunch {
        program: Arc::new(program),
        recording: recording.clone(),
        mode: Mode::Recording,
        options: EngineOptions {
            checkpoint_interval: config.replay.checkpoint_interval,
            eval_budget: config.evaluation.max_steps,
        },
        interrupt: Arc::new(AtomicBool::new(false)),
        faults: FaultPlan::none(),
    });
    engine.attach()?;
    let end = engine.run(Direction::Forward, &NeverStop, false)?;

    recording
        .read()
        .save(out)
        .with_context(|| format!("failed to write {}", out.display()))?;
    tracing::info!(
        target: "retrace.debugger",
        out = %out.display(),
        end = end.position.progress,
        "recording saved"
    );
    Ok(end.position.progress)
}

/// A human-readable summary of a saved recording.
pub fn inspect(path: &Path) -> anyhow::Result<String> {
    let recording =
        Recording::load(path).with_context(|| format!("failed to load {}", path.display()))?;

    let mut out = String::new();
    writeln!(out, "url:       {}", recording.url())?;
    match recording.end() {
        Some(end) if recording.is_truncated() => writeln!(out, "end:       {end} (ended early)")?,
        Some(end) => writeln!(out, "end:       {end}")?,
        None => writeln!(out, "end:       unfinished (frontier {})", recording.frontier())?,
    }
    writeln!(out, "inputs:    {}", recording.inputs().len())?;
    writeln!(out, "console:   {}", recording.console().len())?;
    for message in recording.console() {
        writeln!(
            out,
            "  [{:>6}] {:<5} {}",
            message.execution_point,
            message.level.as_str(),
            message.text
        )?;
    }
    Ok(out)
}

fn file_url(path: &Path) -> String {
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| PathBuf::from(path));
    format!("file://{}", absolute.display())
}
