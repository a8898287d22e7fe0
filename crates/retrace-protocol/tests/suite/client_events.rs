use std::time::Duration;

use retrace_protocol::{make_event, make_response, DebuggerClient, PacketReader, PacketWriter};
use serde_json::json;

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn thread_front_returns_the_pause_that_preceded_the_reply() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_side);
    let (server_read, server_write) = tokio::io::split(server_side);
    let client = DebuggerClient::connect(client_read, client_write);
    let mut reader = PacketReader::new(server_read);
    let mut writer = PacketWriter::new(server_write);

    let mut front = client.thread("thread1");
    let resumed = tokio::spawn(async move { front.resume().await });

    let request = tokio::time::timeout(TIMEOUT, reader.read_value())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(request, json!({"to": "thread1", "type": "resume"}));

    // Another thread's pause must be ignored by this front.
    writer
        .write_value(&make_event(
            "thread2",
            "paused",
            json!({"why": {"type": "interrupted"}, "frame": null, "executionPoint": 1}),
        ))
        .await
        .unwrap();
    writer
        .write_value(&make_event(
            "thread1",
            "paused",
            json!({
                "why": {"type": "breakpoint", "actors": [1]},
                "frame": {
                    "depth": 0,
                    "name": "updateNumber",
                    "serial": 4,
                    "where": {"url": "file:///count.js", "line": 12, "column": 2},
                    "locals": {"current": 3}
                },
                "executionPoint": 17
            }),
        ))
        .await
        .unwrap();
    writer
        .write_value(&make_response("thread1", json!({"type": "resumed"})))
        .await
        .unwrap();

    let paused = tokio::time::timeout(TIMEOUT, resumed)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(paused.from, "thread1");
    assert_eq!(paused.why.kind, "breakpoint");
    assert_eq!(paused.why.extra["actors"], json!([1]));
    assert_eq!(paused.execution_point, 17);
    assert_eq!(paused.line(), Some(12));
    assert_eq!(paused.local("current"), Some(&json!(3)));
}

#[tokio::test]
async fn unsolicited_packets_are_broadcast() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_side);
    let (_server_read, server_write) = tokio::io::split(server_side);
    let client = DebuggerClient::connect(client_read, client_write);
    let mut events = client.subscribe();
    let mut writer = PacketWriter::new(server_write);

    writer
        .write_value(&make_response("root", json!({"applicationType": "retrace"})))
        .await
        .unwrap();

    let greeting = tokio::time::timeout(TIMEOUT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(greeting["applicationType"], "retrace");
}
