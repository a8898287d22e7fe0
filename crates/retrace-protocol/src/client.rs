use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::codec::{PacketReader, PacketWriter};
use crate::front::ThreadFront;
use crate::packet::{
    is_event, packet_error, packet_from, ActorId, ErrorCode, Request, ROOT_ACTOR,
};
use crate::types::{PausedPacket, ThreadForm};

const EVENT_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("{actor} replied {code}: {message}")]
    Server {
        actor: ActorId,
        code: String,
        message: String,
    },

    #[error("unexpected reply from {actor}: {message}")]
    Decode { actor: ActorId, message: String },
}

impl ClientError {
    /// The protocol error code, if this error has one.
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::ConnectionClosed => Some(ErrorCode::ConnectionClosed.as_str()),
            ClientError::Server { code, .. } => Some(code),
            ClientError::Decode { .. } => None,
        }
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

type ReplySender = oneshot::Sender<Result<Value>>;

#[derive(Debug)]
struct Inner {
    outgoing: mpsc::UnboundedSender<Value>,
    /// Replies carry no sequence numbers, so each actor answers in request order.
    pending: Mutex<HashMap<ActorId, VecDeque<ReplySender>>>,
    events: broadcast::Sender<Value>,
    shutdown: CancellationToken,
}

impl Inner {
    fn dispatch(&self, packet: Value) {
        // The greeting can cross a request already sent to `root`.
        if is_event(&packet) || packet.get("applicationType").is_some() {
            let _ = self.events.send(packet);
            return;
        }

        let waiter = packet_from(&packet).and_then(|from| {
            let mut pending = self.pending.lock();
            let queue = pending.get_mut(from)?;
            let waiter = queue.pop_front();
            if queue.is_empty() {
                pending.remove(from);
            }
            waiter
        });

        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok(packet));
            }
            None => {
                tracing::debug!(target: "retrace.protocol", "unsolicited packet");
                let _ = self.events.send(packet);
            }
        }
    }

    fn fail_pending(&self) {
        let pending = {
            let mut pending = self.pending.lock();
            std::mem::take(&mut *pending)
        };
        for (_actor, queue) in pending {
            for tx in queue {
                let _ = tx.send(Err(ClientError::ConnectionClosed));
            }
        }
    }
}

/// Async client for a retrace debugger server.
#[derive(Debug, Clone)]
pub struct DebuggerClient {
    inner: Arc<Inner>,
}

impl DebuggerClient {
    /// Start the reader and writer tasks on the current runtime.
    pub fn connect<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let inner = Arc::new(Inner {
            outgoing,
            pending: Mutex::new(HashMap::new()),
            events,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(write_loop(writer, outgoing_rx, inner.shutdown.clone()));
        tokio::spawn(read_loop(reader, inner.clone()));

        Self { inner }
    }

    /// Send `{to, type, ...args}` and wait for the actor's reply.
    ///
    /// Error replies come back as [`ClientError::Server`].
    pub async fn request(&self, to: &str, kind: &str, args: Value) -> Result<Value> {
        let packet = Request::new(to, kind, args).into_value();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock();
            if self.inner.shutdown.is_cancelled() {
                return Err(ClientError::ConnectionClosed);
            }
            // Queue and send under one lock so queue order matches wire order.
            pending.entry(to.to_owned()).or_default().push_back(tx);
            if self.inner.outgoing.send(packet).is_err() {
                if let Some(queue) = pending.get_mut(to) {
                    queue.pop_back();
                }
                return Err(ClientError::ConnectionClosed);
            }
        }

        let reply = rx.await.map_err(|_| ClientError::ConnectionClosed)??;
        if let Some((code, message)) = packet_error(&reply) {
            return Err(ClientError::Server {
                actor: to.to_owned(),
                code: code.to_owned(),
                message: message.to_owned(),
            });
        }
        Ok(reply)
    }

    /// Like [`request`](Self::request), decoding `field` of the reply.
    pub async fn request_field<T: DeserializeOwned>(
        &self,
        to: &str,
        kind: &str,
        args: Value,
        field: &str,
    ) -> Result<T> {
        let mut reply = self.request(to, kind, args).await?;
        let value = reply
            .get_mut(field)
            .map(Value::take)
            .unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|err| ClientError::Decode {
            actor: to.to_owned(),
            message: err.to_string(),
        })
    }

    /// Events (and unsolicited packets) received after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.inner.events.subscribe()
    }

    pub fn thread(&self, actor: impl Into<ActorId>) -> ThreadFront {
        ThreadFront::new(self.clone(), actor.into())
    }

    pub async fn list_threads(&self) -> Result<Vec<ThreadForm>> {
        self.request_field(ROOT_ACTOR, "listThreads", Value::Null, "threads")
            .await
    }

    /// Start recording `source` and return a front for the new thread, which is
    /// paused at its first execution site.
    pub async fn start_recording(
        &self,
        url: &str,
        source: &str,
    ) -> Result<(ThreadFront, PausedPacket)> {
        let reply = self
            .request(
                ROOT_ACTOR,
                "startRecording",
                json!({"url": url, "source": source}),
            )
            .await?;
        self.thread_from_reply(reply)
    }

    /// Open a saved recording; the thread starts paused at the end of it.
    pub async fn load_recording(&self, path: &Path) -> Result<(ThreadFront, PausedPacket)> {
        let reply = self
            .request(
                ROOT_ACTOR,
                "loadRecording",
                json!({"path": path.display().to_string()}),
            )
            .await?;
        self.thread_from_reply(reply)
    }

    fn thread_from_reply(&self, reply: Value) -> Result<(ThreadFront, PausedPacket)> {
        let decode = |message: String| ClientError::Decode {
            actor: ROOT_ACTOR.to_owned(),
            message,
        };
        let actor = reply
            .get("actor")
            .and_then(Value::as_str)
            .ok_or_else(|| decode("missing `actor`".to_owned()))?
            .to_owned();
        let mut paused = reply.get("paused").cloned().unwrap_or(Value::Null);
        if let Value::Object(map) = &mut paused {
            map.insert("from".to_owned(), Value::String(actor.clone()));
        }
        let paused: PausedPacket =
            serde_json::from_value(paused).map_err(|err| decode(err.to_string()))?;
        Ok((self.thread(actor), paused))
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Close the connection. Pending requests fail with `ConnectionClosed`.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

async fn write_loop<W>(writer: W, mut outgoing: mpsc::UnboundedReceiver<Value>, shutdown: CancellationToken)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = PacketWriter::new(writer);
    loop {
        let packet = tokio::select! {
            _ = shutdown.cancelled() => break,
            packet = outgoing.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };
        if let Err(err) = writer.write_value(&packet).await {
            tracing::debug!(target: "retrace.protocol", error = %err, "writer stopped");
            shutdown.cancel();
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop<R>(reader: R, inner: Arc<Inner>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = PacketReader::new(reader);
    loop {
        let packet = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            packet = reader.read_value() => packet,
        };
        match packet {
            Ok(Some(packet)) => inner.dispatch(packet),
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(target: "retrace.protocol", error = %err, "reader stopped");
                break;
            }
        }
    }

    inner.shutdown.cancel();
    inner.fail_pending();
}
