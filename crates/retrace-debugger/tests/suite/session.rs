use std::sync::Arc;

use retrace_protocol::{DebuggerClient, PacketReader, PacketWriter, ROOT_ACTOR};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::support::{code, config, connect, eval, finished, start, within, COUNTER, URL};

#[tokio::test]
async fn the_root_actor_greets_first() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_side);
    tokio::spawn(retrace_debugger::run(
        server_read,
        server_write,
        Arc::new(config()),
    ));

    let (client_read, client_write) = tokio::io::split(client_side);
    let mut reader = PacketReader::new(client_read);
    let greeting = within(reader.read_value()).await.unwrap().unwrap();
    assert_eq!(greeting["from"], ROOT_ACTOR);
    assert_eq!(greeting["applicationType"], "retrace");

    // A body that is not JSON is answered by the root actor and the
    // connection stays up.
    let mut writer = PacketWriter::new(client_write);
    within(writer.write_value(&json!("not a request"))).await.unwrap();
    let reply = within(reader.read_value()).await.unwrap().unwrap();
    assert_eq!(reply["from"], ROOT_ACTOR);
    assert_eq!(reply["error"], "badParameterType");

    within(writer.write_value(&json!({"to": ROOT_ACTOR, "type": "listThreads"})))
        .await
        .unwrap();
    let reply = within(reader.read_value()).await.unwrap().unwrap();
    assert_eq!(reply["threads"], json!([]));
}

#[tokio::test]
async fn unknown_actors_and_packet_types_are_errors() {
    let client = connect();

    let err = within(client.request("thread9", "resume", json!({})))
        .await
        .unwrap_err();
    assert_eq!(code(&err), "unknownActor");

    let err = within(client.request(ROOT_ACTOR, "reticulate", json!({})))
        .await
        .unwrap_err();
    assert_eq!(code(&err), "unrecognizedPacketType");

    let (front, _) = start(&client, COUNTER).await;
    let err = within(front.request("reticulate", json!({})))
        .await
        .unwrap_err();
    assert_eq!(code(&err), "unrecognizedPacketType");

    let err = within(front.request("timeWarp", json!({"target": "later"})))
        .await
        .unwrap_err();
    assert_eq!(code(&err), "badParameterType");

    let threads = within(client.list_threads()).await.unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].actor, front.actor());
    assert_eq!(threads[0].mode, "recording");
}

#[tokio::test]
async fn a_saved_recording_replays_after_reloading() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counter.json");

    let client = connect();
    let front = finished(&client, COUNTER).await;
    within(front.save_recording(&path)).await.unwrap();

    let (mut replay, paused) = within(client.load_recording(&path)).await.unwrap();
    assert_eq!(paused.why.kind, "finished");
    assert_ne!(replay.actor(), front.actor());

    within(replay.set_breakpoint(URL, 12, None, None)).await.unwrap();
    within(replay.rewind()).await.unwrap();
    assert_eq!(eval(&replay, "number").await, json!(10));
    within(replay.rewind()).await.unwrap();
    assert_eq!(eval(&replay, "number").await, json!(9));

    let messages = within(replay.console_messages()).await.unwrap();
    let original = within(front.console_messages()).await.unwrap();
    assert_eq!(messages, original);

    let threads = within(client.list_threads()).await.unwrap();
    let modes: Vec<_> = threads.iter().map(|thread| thread.mode.as_str()).collect();
    assert_eq!(modes, ["recording", "replaying"]);
}

#[tokio::test]
async fn an_unfinished_recording_cannot_be_saved() {
    let dir = tempfile::tempdir().unwrap();
    let client = connect();
    let (front, _) = start(&client, COUNTER).await;

    let err = within(front.save_recording(&dir.path().join("early.json")))
        .await
        .unwrap_err();
    assert_eq!(code(&err), "recordingNotFinished");
}

#[tokio::test]
async fn loading_a_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let client = connect();
    let err = within(client.load_recording(&dir.path().join("missing.json")))
        .await
        .unwrap_err();
    assert_eq!(code(&err), "ioError");
}

#[tokio::test]
async fn deeply_nested_scripts_are_rejected_as_script_errors() {
    let client = connect();

    let source = format!("let x = {}1{};\n", "(".repeat(50_000), ")".repeat(50_000));
    let err = within(client.start_recording(URL, &source)).await.unwrap_err();
    assert_eq!(code(&err), "scriptError");

    let (front, _) = start(&client, COUNTER).await;
    let err = within(front.evaluate(&format!("{}1", "-".repeat(2_000))))
        .await
        .unwrap_err();
    assert_eq!(code(&err), "scriptError");

    // The target is still usable afterwards.
    let value = eval(&front, &format!("{}1", "-".repeat(20))).await;
    assert_eq!(value, json!(1));
}

#[tokio::test]
async fn evaluating_in_a_missing_frame_is_a_bad_parameter() {
    let client = connect();
    let (front, _) = start(&client, COUNTER).await;
    let err = within(front.evaluate_in_frame("number", 5))
        .await
        .unwrap_err();
    assert_eq!(code(&err), "badParameterType");
}

#[tokio::test]
async fn a_detached_thread_refuses_requests() {
    let client = connect();
    let (mut front, _) = start(&client, COUNTER).await;

    within(front.detach()).await.unwrap();
    let err = within(front.resume()).await.unwrap_err();
    assert_eq!(code(&err), "wrongState");

    let threads = within(client.list_threads()).await.unwrap();
    assert_eq!(threads[0].state, "detached");
}

#[tokio::test]
async fn tcp_listener_serves_each_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(retrace_debugger::serve_tcp(
        listener,
        Arc::new(config()),
        shutdown.clone(),
    ));

    for _ in 0..2 {
        let stream = within(TcpStream::connect(addr)).await.unwrap();
        let (reader, writer) = stream.into_split();
        let client = DebuggerClient::connect(reader, writer);
        let (front, paused) = start(&client, COUNTER).await;
        assert_eq!(paused.why.kind, "attached");
        assert_eq!(front.actor(), "thread1");
        client.shutdown();
    }

    shutdown.cancel();
    within(server).await.unwrap().unwrap();
}
