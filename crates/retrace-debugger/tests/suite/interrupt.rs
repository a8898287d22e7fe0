use std::time::Duration;

use super::support::{code, connect, start, within};

const ENDLESS: &str = "let i = 0;\nwhile (true) {\n  i = i + 1;\n}\n";

#[tokio::test]
async fn interrupt_stops_an_endless_loop() {
    let client = connect();
    let (front, _) = start(&client, ENDLESS).await;

    let err = within(front.interrupt()).await.unwrap_err();
    assert_eq!(code(&err), "notRunning");

    let mut runner = front.clone();
    let resumed = tokio::spawn(async move { runner.resume().await });

    // The resume may still be queued when the first interrupt arrives.
    within(async {
        loop {
            match front.interrupt().await {
                Ok(()) => break,
                Err(err) if code(&err) == "notRunning" => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(err) => panic!("interrupt failed: {err}"),
            }
        }
    })
    .await;

    let paused = within(resumed).await.unwrap().unwrap();
    assert_eq!(paused.why.kind, "interrupted");
    assert!(matches!(paused.line(), Some(2 | 3)));

    let threads = within(client.list_threads()).await.unwrap();
    assert_eq!(threads[0].state, "paused");
}

#[tokio::test]
async fn an_ended_recording_stops_at_its_end() {
    let client = connect();
    let (mut front, _) = start(&client, ENDLESS).await;

    let mut runner = front.clone();
    let resumed = tokio::spawn(async move { runner.resume().await });
    within(async {
        while front.interrupt().await.is_err() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    let interrupted = within(resumed).await.unwrap().unwrap();

    within(front.end_recording()).await.unwrap();
    within(front.rewind_to_line(3)).await.unwrap();
    let end = within(front.resume()).await.unwrap();
    assert_eq!(end.why.kind, "finished");
    assert_eq!(end.execution_point, interrupted.execution_point);

    let dir = tempfile::tempdir().unwrap();
    within(front.save_recording(&dir.path().join("endless.json")))
        .await
        .unwrap();
}
