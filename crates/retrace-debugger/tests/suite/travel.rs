use serde_json::json;

use super::support::{code, connect, eval, finished, start, within, COUNTER, URL};

#[tokio::test]
async fn recording_starts_paused_at_the_first_site() {
    let client = connect();
    let (front, paused) = start(&client, COUNTER).await;
    assert_eq!(paused.why.kind, "attached");
    assert_eq!(paused.line(), Some(2));
    assert_eq!(paused.from, front.actor());
}

#[tokio::test]
async fn rewinding_and_resuming_visit_each_count() {
    let client = connect();
    let mut front = finished(&client, COUNTER).await;
    within(front.set_breakpoint(URL, 12, None, None)).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..5 {
        let paused = within(front.rewind()).await.unwrap();
        assert_eq!(paused.why.kind, "breakpoint");
        assert_eq!(paused.line(), Some(12));
        seen.push(eval(&front, "number").await);
    }
    assert_eq!(seen, [json!(10), json!(9), json!(8), json!(7), json!(6)]);

    let mut seen = Vec::new();
    for _ in 0..4 {
        within(front.resume()).await.unwrap();
        seen.push(eval(&front, "number").await);
    }
    assert_eq!(seen, [json!(7), json!(8), json!(9), json!(10)]);

    let last = within(front.resume()).await.unwrap();
    assert_eq!(last.why.kind, "finished");
}

#[tokio::test]
async fn reverse_step_past_the_top_frame_lands_on_the_last_breakpoint_hit() {
    let client = connect();
    let mut front = finished(&client, COUNTER).await;
    within(front.set_breakpoint(URL, 4, None, None)).await.unwrap();

    let paused = within(front.rewind()).await.unwrap();
    assert_eq!(paused.line(), Some(4));
    assert_eq!(eval(&front, "number").await, json!(9));

    // Line 4 opens `f`, so there is nothing earlier in this frame.
    let paused = within(front.reverse_step_over()).await.unwrap();
    assert_eq!(paused.why.kind, "breakpoint");
    assert_eq!(paused.line(), Some(4));
    assert_eq!(eval(&front, "number").await, json!(8));
}

#[tokio::test]
async fn stepping_in_and_out_of_a_call() {
    let client = connect();
    let (mut front, _) = start(&client, COUNTER).await;
    within(front.set_breakpoint(URL, 4, None, None)).await.unwrap();
    let paused = within(front.resume()).await.unwrap();
    assert_eq!(paused.line(), Some(4));

    let paused = within(front.step_in()).await.unwrap();
    assert_eq!(paused.why.kind, "resumeLimit");
    assert_eq!(paused.frame.as_ref().map(|frame| frame.name.as_str()), Some("updateNumber"));
    assert_eq!(paused.line(), Some(11));

    let paused = within(front.step_out()).await.unwrap();
    assert_eq!(paused.frame.as_ref().map(|frame| frame.name.as_str()), Some("f"));
    assert_eq!(paused.line(), Some(5));

    let paused = within(front.reverse_step_over()).await.unwrap();
    assert_eq!(paused.line(), Some(4));

    let paused = within(front.step_over()).await.unwrap();
    assert_eq!(paused.line(), Some(5));
    assert_eq!(eval(&front, "number").await, json!(1));

    let frames = within(front.frames()).await.unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].name, "f");
}

#[tokio::test]
async fn line_targets_and_their_boundaries() {
    let client = connect();
    let mut front = finished(&client, COUNTER).await;

    let paused = within(front.rewind_to_line(4)).await.unwrap();
    assert_eq!(paused.why.kind, "resumeLimit");
    assert_eq!(eval(&front, "number").await, json!(9));

    let err = within(front.resume_to_line(99)).await.unwrap_err();
    assert_eq!(code(&err), "noFutureOccurrence");
    let err = within(front.rewind_to_line(99)).await.unwrap_err();
    assert_eq!(code(&err), "noPriorOccurrence");
    assert_eq!(eval(&front, "number").await, json!(9));

    let paused = within(front.resume_to_line(12)).await.unwrap();
    assert_eq!(paused.line(), Some(12));
    assert_eq!(eval(&front, "number").await, json!(10));
}

#[tokio::test]
async fn warping_to_console_messages() {
    let source = "\
let i = 0;
while (i < 3) {
  console.log('tick', i);
  i = i + 1;
}
";
    let client = connect();
    let mut front = finished(&client, source).await;

    let messages = within(front.console_messages()).await.unwrap();
    let texts: Vec<_> = messages.iter().map(|message| message.text.as_str()).collect();
    assert_eq!(texts, ["tick 0", "tick 1", "tick 2"]);

    let paused = within(front.time_warp(messages[1].execution_point))
        .await
        .unwrap();
    assert_eq!(paused.why.kind, "timeWarp");
    assert_eq!(paused.execution_point, messages[1].execution_point);
    assert_eq!(eval(&front, "i").await, json!(1));

    let err = within(front.time_warp(0)).await.unwrap_err();
    assert_eq!(code(&err), "noPriorOccurrence");

    // Going back over the loop does not log anything twice.
    within(front.resume()).await.unwrap();
    assert_eq!(within(front.console_messages()).await.unwrap().len(), 3);
}

#[tokio::test]
async fn checkpoints_are_listed_in_order() {
    let client = connect();
    let front = finished(&client, COUNTER).await;
    let checkpoints = within(front.checkpoints()).await.unwrap();
    assert!(checkpoints.len() > 2);
    assert!(checkpoints
        .windows(2)
        .all(|pair| pair[0].id < pair[1].id && pair[0].execution_point < pair[1].execution_point));
}
