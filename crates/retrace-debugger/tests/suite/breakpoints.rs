use serde_json::json;

use super::support::{code, connect, eval, start, within, COUNTER, URL};

const CHECKED: &str = "\
let n = 0;
function check() {
  n = n + 1;
}
check();
debugger;
let done = true;
";

#[tokio::test]
async fn a_throwing_condition_does_not_pause_without_pause_on_exceptions() {
    let client = connect();
    let (mut front, _) = start(&client, CHECKED).await;
    within(front.set_breakpoint(URL, 3, None, Some("missing > 0")))
        .await
        .unwrap();

    let paused = within(front.resume()).await.unwrap();
    assert_eq!(paused.why.kind, "debuggerStatement");
    assert_eq!(paused.line(), Some(6));
}

#[tokio::test]
async fn a_throwing_condition_pauses_with_pause_on_exceptions() {
    let client = connect();
    let (mut front, _) = start(&client, CHECKED).await;
    let breakpoint = within(front.set_breakpoint(URL, 3, None, Some("missing > 0")))
        .await
        .unwrap();
    within(front.pause_on_exceptions(true)).await.unwrap();

    let paused = within(front.resume()).await.unwrap();
    assert_eq!(paused.why.kind, "breakpointConditionThrown");
    assert_eq!(paused.why.extra["breakpoint"], json!(breakpoint.id));
    assert!(paused.why.extra["message"]
        .as_str()
        .is_some_and(|message| message.contains("missing is not defined")));
    assert_eq!(paused.line(), Some(3));
}

#[tokio::test]
async fn a_throw_statement_condition_follows_pause_on_exceptions() {
    let client = connect();
    let (mut front, _) = start(&client, CHECKED).await;
    within(front.set_breakpoint(URL, 3, None, Some("throw new Error()")))
        .await
        .unwrap();

    let paused = within(front.resume()).await.unwrap();
    assert_eq!(paused.why.kind, "debuggerStatement");
    assert_eq!(eval(&front, "n").await, json!(1));

    let (mut front, _) = start(&client, CHECKED).await;
    let breakpoint = within(front.set_breakpoint(URL, 3, None, Some("throw new Error()")))
        .await
        .unwrap();
    within(front.pause_on_exceptions(true)).await.unwrap();
    let paused = within(front.resume()).await.unwrap();
    assert_eq!(paused.why.kind, "breakpointConditionThrown");
    assert_eq!(paused.why.extra["breakpoint"], json!(breakpoint.id));
    assert_eq!(paused.why.extra["message"], "Error");
    assert_eq!(paused.line(), Some(3));
}

#[tokio::test]
async fn conditions_select_the_matching_hit() {
    let client = connect();
    let (mut front, _) = start(&client, COUNTER).await;
    within(front.set_breakpoint(URL, 12, None, Some("number == 5")))
        .await
        .unwrap();

    let paused = within(front.resume()).await.unwrap();
    assert_eq!(paused.why.kind, "breakpoint");
    assert_eq!(eval(&front, "number").await, json!(5));

    let end = within(front.resume()).await.unwrap();
    assert_eq!(end.why.kind, "finished");
}

#[tokio::test]
async fn breakpoints_can_be_listed_disabled_and_removed() {
    let client = connect();
    let (mut front, _) = start(&client, COUNTER).await;

    let first = within(front.set_breakpoint(URL, 12, None, None)).await.unwrap();
    let again = within(front.set_breakpoint(URL, 12, None, None)).await.unwrap();
    assert_eq!(first.id, again.id);
    let other = within(front.set_breakpoint(URL, 4, None, None)).await.unwrap();
    assert_eq!(within(front.list_breakpoints()).await.unwrap().len(), 2);

    within(front.set_breakpoint_enabled(other.id, false)).await.unwrap();
    let paused = within(front.resume()).await.unwrap();
    assert_eq!(paused.line(), Some(12));

    within(front.remove_breakpoint(first.id)).await.unwrap();
    within(front.remove_breakpoint(first.id)).await.unwrap();
    let breakpoints = within(front.list_breakpoints()).await.unwrap();
    assert_eq!(breakpoints.len(), 1);
    assert!(!breakpoints[0].enabled);

    let err = within(front.set_breakpoint_enabled(first.id, true))
        .await
        .unwrap_err();
    assert_eq!(code(&err), "noSuchBreakpoint");

    let end = within(front.resume()).await.unwrap();
    assert_eq!(end.why.kind, "finished");
}

#[tokio::test]
async fn skipping_breakpoints_ignores_debugger_statements() {
    let client = connect();
    let (mut front, _) = start(&client, CHECKED).await;
    within(front.set_breakpoint(URL, 3, None, None)).await.unwrap();
    within(front.skip_breakpoints(true)).await.unwrap();

    let end = within(front.resume()).await.unwrap();
    assert_eq!(end.why.kind, "finished");
    assert_eq!(eval(&front, "done").await, json!(true));
}

#[tokio::test]
async fn pausing_on_an_uncaught_throw() {
    let source = "\
function fail() {
  throw new Error('bad');
}
fail();
";
    let client = connect();
    let (mut front, _) = start(&client, source).await;
    within(front.pause_on_exceptions(true)).await.unwrap();

    let paused = within(front.resume()).await.unwrap();
    assert_eq!(paused.why.kind, "exception");
    assert_eq!(paused.why.extra["exception"]["class"], "Error");
    assert_eq!(paused.line(), Some(2));

    within(front.resume()).await.unwrap();
    let messages = within(front.console_messages()).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].level, "error");
    assert_eq!(messages[0].text, "Uncaught Error: bad");
}

#[tokio::test]
async fn evaluation_reports_nested_pauses_without_moving() {
    let source = "\
let total = 0;
function add(x) {
  debugger;
  return total + x;
}
let ready = true;
";
    let client = connect();
    let (mut front, _) = start(&client, source).await;
    let paused = within(front.resume()).await.unwrap();
    assert_eq!(paused.why.kind, "finished");

    let evaluation = within(front.evaluate("add(2)")).await.unwrap();
    assert_eq!(evaluation.result, Some(json!(2)));
    assert_eq!(evaluation.nested_pauses.len(), 1);
    assert_eq!(evaluation.nested_pauses[0].why.kind, "debuggerStatement");

    let err = within(front.evaluate("Math.random()")).await.unwrap_err();
    assert_eq!(code(&err), "divergence");
    assert_eq!(eval(&front, "ready").await, json!(true));
}
