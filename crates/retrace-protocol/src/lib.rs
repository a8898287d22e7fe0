//! Transport layer of the retrace debugging protocol.
//!
//! Packets are JSON objects framed with a `Content-Length` header. Requests are
//! addressed to an actor (`{to, type, ...}`), replies name the actor they come from
//! (`{from, ...}`), and unsolicited events such as `paused` share the same channel.

pub mod client;
pub mod codec;
pub mod front;
pub mod packet;
pub mod types;

pub use client::{ClientError, DebuggerClient};
pub use codec::{CodecError, PacketReader, PacketWriter, MAX_HEADER_LINE_BYTES, MAX_PACKET_BYTES};
pub use front::ThreadFront;
pub use packet::{
    is_event, make_error, make_event, make_response, packet_error, packet_from, packet_type,
    ActorId, ErrorCode, Request, EVENT_TYPES, ROOT_ACTOR,
};
pub use types::{
    BreakpointForm, CheckpointForm, ConsoleMessageForm, EvaluationForm, FrameForm,
    NestedPauseForm, PausedPacket, SourceLocation, ThreadForm, Why,
};

/// Entry points for fuzz targets.
#[cfg(feature = "fuzzing")]
pub mod fuzzing {
    /// Feed `input` through the packet reader until it errors or runs dry.
    pub async fn read_packets(input: &[u8]) {
        use tokio::io::AsyncWriteExt as _;

        let (mut writer, reader) = tokio::io::duplex(input.len().max(1));
        let _ = writer.write_all(input).await;
        drop(writer);

        let mut reader = crate::PacketReader::new(reader);
        while let Ok(Some(_)) = reader.read_value().await {}
    }
}
