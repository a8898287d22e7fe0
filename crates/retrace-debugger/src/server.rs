//! Serving protocol sessions over a byte stream.

use std::sync::Arc;

use retrace_config::RetraceConfig;
use retrace_engine::FaultPlan;
use retrace_protocol::{make_error, CodecError, ErrorCode, PacketReader, PacketWriter, ROOT_ACTOR};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::session::Session;

pub async fn run_stdio(config: Arc<RetraceConfig>) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    run(stdin, stdout, config).await.map_err(anyhow::Error::from)
}

/// Serve one session until the client hangs up.
pub async fn run<R, W>(reader: R, writer: W, config: Arc<RetraceConfig>) -> Result<(), CodecError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    run_with_faults(reader, writer, config, FaultPlan::none()).await
}

/// [`run`], with planned child crashes for every target of the session.
pub async fn run_with_faults<R, W>(
    reader: R,
    writer: W,
    config: Arc<RetraceConfig>,
    faults: FaultPlan,
) -> Result<(), CodecError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();

    let writer_task = tokio::spawn(async move {
        let mut writer = PacketWriter::new(writer);
        while let Some(packet) = out_rx.recv().await {
            if let Err(err) = writer.write_value(&packet).await {
                tracing::warn!(target: "retrace.debugger", error = %err, "failed to write packet");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let _ = out_tx.send(Session::greeting());
    let mut session = Session::new(config, faults, out_tx);
    let mut reader = PacketReader::new(reader);

    let result = loop {
        match reader.read_value().await {
            Ok(Some(packet)) => session.handle_packet(packet).await,
            Ok(None) => break Ok(()),
            Err(CodecError::Json(message)) => {
                tracing::debug!(target: "retrace.debugger", %message, "malformed packet");
                session.send(make_error(ROOT_ACTOR, ErrorCode::BadParameterType, message));
            }
            Err(err) => break Err(err),
        }
    };

    // Dropping the session drops the last senders once its actors wind down,
    // which lets the writer drain and finish.
    drop(session);
    let _ = writer_task.await;
    tracing::debug!(target: "retrace.debugger", "session closed");
    result
}

/// Accept connections until `shutdown` fires, one session per connection.
pub async fn serve_tcp(
    listener: TcpListener,
    config: Arc<RetraceConfig>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    tracing::info!(
        target: "retrace.debugger",
        addr = %listener.local_addr()?,
        "listening"
    );
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        tracing::info!(target: "retrace.debugger", %peer, "client connected");
        let config = config.clone();
        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            if let Err(err) = run(reader, writer, config).await {
                tracing::warn!(target: "retrace.debugger", %peer, error = %err, "session failed");
            }
        });
    }
}
