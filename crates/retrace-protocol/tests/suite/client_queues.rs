use std::time::Duration;

use retrace_protocol::{
    make_error, make_response, DebuggerClient, ErrorCode, PacketReader, PacketWriter,
};
use serde_json::json;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

const TIMEOUT: Duration = Duration::from_secs(5);

struct FakeServer {
    reader: PacketReader<ReadHalf<DuplexStream>>,
    writer: PacketWriter<WriteHalf<DuplexStream>>,
}

fn connect() -> (DebuggerClient, FakeServer) {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_side);
    let (server_read, server_write) = tokio::io::split(server_side);
    let client = DebuggerClient::connect(client_read, client_write);
    let server = FakeServer {
        reader: PacketReader::new(server_read),
        writer: PacketWriter::new(server_write),
    };
    (client, server)
}

#[tokio::test]
async fn replies_are_matched_per_actor_in_request_order() {
    let (client, mut server) = connect();

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.request("thread1", "frames", json!({})).await }
    });
    // Make sure the first request hits the wire before the others.
    let packet = tokio::time::timeout(TIMEOUT, server.reader.read_value())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(packet["type"], "frames");

    let second = tokio::spawn({
        let client = client.clone();
        async move { client.request("thread1", "checkpoints", json!({})).await }
    });
    let other = tokio::spawn({
        let client = client.clone();
        async move { client.request("thread2", "frames", json!({})).await }
    });
    for _ in 0..2 {
        tokio::time::timeout(TIMEOUT, server.reader.read_value())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    // Answer thread2 first, then thread1's two requests in order.
    for (from, marker) in [("thread2", "other"), ("thread1", "first"), ("thread1", "second")] {
        server
            .writer
            .write_value(&make_response(from, json!({"marker": marker})))
            .await
            .unwrap();
    }

    let first = tokio::time::timeout(TIMEOUT, first).await.unwrap().unwrap().unwrap();
    let second = tokio::time::timeout(TIMEOUT, second).await.unwrap().unwrap().unwrap();
    let other = tokio::time::timeout(TIMEOUT, other).await.unwrap().unwrap().unwrap();
    assert_eq!(first["marker"], "first");
    assert_eq!(second["marker"], "second");
    assert_eq!(other["marker"], "other");
}

#[tokio::test]
async fn error_replies_surface_their_code() {
    let (client, mut server) = connect();

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request("thread7", "resume", json!({})).await }
    });
    tokio::time::timeout(TIMEOUT, server.reader.read_value())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    server
        .writer
        .write_value(&make_error("thread7", ErrorCode::UnknownActor, "no such actor"))
        .await
        .unwrap();

    let err = tokio::time::timeout(TIMEOUT, pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert_eq!(err.code(), Some("unknownActor"));
}

#[tokio::test]
async fn pending_requests_fail_with_connection_closed_on_disconnect() {
    let (client, mut server) = connect();

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request("thread1", "resume", json!({})).await }
    });
    tokio::time::timeout(TIMEOUT, server.reader.read_value())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    drop(server);

    let err = tokio::time::timeout(TIMEOUT, pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert_eq!(err.code(), Some("connectionClosed"));

    // Later requests fail fast instead of hanging.
    let err = tokio::time::timeout(TIMEOUT, client.request("thread1", "frames", json!({})))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.code(), Some("connectionClosed"));
    assert!(client.is_closed());
}
