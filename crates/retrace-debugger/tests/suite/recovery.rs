use std::path::Path;

use retrace_engine::FaultPlan;
use serde_json::json;

use super::support::{code, config, connect, connect_with, eval, finished, within, COUNTER, URL};

async fn save_counter(path: &Path) {
    let client = connect();
    let front = finished(&client, COUNTER).await;
    within(front.save_recording(path)).await.unwrap();
}

#[tokio::test]
async fn a_single_crash_while_replaying_is_invisible() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counter.json");
    save_counter(&path).await;

    let faults = FaultPlan::crash_at([1]);
    let client = connect_with(config(), faults.clone());
    let (mut front, paused) = within(client.load_recording(&path)).await.unwrap();
    assert_eq!(paused.why.kind, "finished");

    within(front.set_breakpoint(URL, 12, None, None)).await.unwrap();
    within(front.time_warp(1)).await.unwrap();
    let paused = within(front.resume()).await.unwrap();
    assert_eq!(paused.why.kind, "breakpoint");
    assert_eq!(eval(&front, "number").await, json!(1));
    assert_eq!(faults.remaining(), 0);

    let dump = within(front.dump()).await.unwrap();
    assert_eq!(dump["restarts"], 1);
    assert_eq!(dump["state"], "paused");
}

#[tokio::test]
async fn one_failed_recovery_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counter.json");
    save_counter(&path).await;

    // The relaunched child crashes on the retried request as well.
    let faults = FaultPlan::crash_at([1, 1]);
    let client = connect_with(config(), faults.clone());
    let (mut front, _) = within(client.load_recording(&path)).await.unwrap();
    within(front.set_breakpoint(URL, 12, None, None)).await.unwrap();
    within(front.time_warp(1)).await.unwrap();

    let paused = within(front.resume()).await.unwrap();
    assert_eq!(paused.why.kind, "breakpoint");
    assert_eq!(eval(&front, "number").await, json!(1));
    assert_eq!(faults.remaining(), 0);

    let dump = within(front.dump()).await.unwrap();
    assert_eq!(dump["restarts"], 2);
    assert_eq!(dump["state"], "paused");
}

#[tokio::test]
async fn repeated_failed_recoveries_tear_the_target_down() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counter.json");
    save_counter(&path).await;

    let client = connect_with(config(), FaultPlan::crash_at([1, 1, 1]));
    let (mut front, _) = within(client.load_recording(&path)).await.unwrap();
    within(front.time_warp(1)).await.unwrap();

    let err = within(front.resume()).await.unwrap_err();
    assert_eq!(code(&err), "fatalError");
    let err = within(front.next_paused()).await.unwrap_err();
    assert_eq!(code(&err), "fatalError");

    let err = within(front.evaluate("number")).await.unwrap_err();
    assert_eq!(code(&err), "wrongState");
    let threads = within(client.list_threads()).await.unwrap();
    assert_eq!(threads[0].state, "detached");
}

#[tokio::test]
async fn a_crash_while_recording_is_not_recovered() {
    let client = connect_with(config(), FaultPlan::crash_at([1]));
    let (mut front, _) = within(client.start_recording(URL, COUNTER)).await.unwrap();

    let err = within(front.resume()).await.unwrap_err();
    assert_eq!(code(&err), "childProcessCrashed");
    let err = within(front.next_paused()).await.unwrap_err();
    assert_eq!(code(&err), "fatalError");
}

#[tokio::test]
async fn restarts_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counter.json");
    save_counter(&path).await;

    let mut config = config();
    config.replay.restart_enabled = false;
    let client = connect_with(config, FaultPlan::crash_at([1]));
    let (mut front, _) = within(client.load_recording(&path)).await.unwrap();
    within(front.time_warp(1)).await.unwrap();

    let err = within(front.resume()).await.unwrap_err();
    assert_eq!(code(&err), "childProcessCrashed");
}
