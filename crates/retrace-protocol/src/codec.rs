//! `Content-Length` framing for protocol packets.
//!
//! ```text
//! Content-Length: 42\r\n
//! \r\n
//! {"to":"thread1","type":"resume"}
//! ```

use std::io;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Largest packet body accepted by [`PacketReader`].
pub const MAX_PACKET_BYTES: usize = 16 * 1024 * 1024;

/// Largest single header line accepted by [`PacketReader`].
pub const MAX_HEADER_LINE_BYTES: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The frame was well formed but its body is not JSON. The stream is still
    /// positioned at the next frame.
    #[error("malformed packet: {0}")]
    Json(String),

    /// The framing itself is broken; the stream cannot be resynchronized.
    #[error("framing error: {0}")]
    Framing(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(sanitize_json_error_message(&value.to_string()))
    }
}

pub type Result<T, E = CodecError> = std::result::Result<T, E>;

/// Strip quoted scalars out of serde_json messages; packet bodies carry evaluated
/// expressions and script sources that should not end up in logs.
fn sanitize_json_error_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(start) = rest.find('"') {
        out.push_str(&rest[..start + 1]);
        rest = &rest[start + 1..];

        let Some(end) = rest.find('"') else {
            out.push_str(rest);
            return out;
        };
        out.push_str("<redacted>\"");
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}

pub struct PacketReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Read one header line, refusing lines longer than [`MAX_HEADER_LINE_BYTES`].
    async fn read_line_limited(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let limit = (MAX_HEADER_LINE_BYTES + 1) as u64;
        let n = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if buf.len() > MAX_HEADER_LINE_BYTES {
            return Err(CodecError::Framing(format!(
                "header line exceeds {MAX_HEADER_LINE_BYTES} bytes"
            )));
        }
        String::from_utf8(buf)
            .map(Some)
            .map_err(|_| CodecError::Framing("header line is not valid UTF-8".to_owned()))
    }

    /// Returns `Ok(None)` on a clean EOF between packets.
    pub async fn read_value(&mut self) -> Result<Option<Value>> {
        let mut content_length: Option<usize> = None;
        let mut saw_header_line = false;

        loop {
            let Some(line) = self.read_line_limited().await? else {
                if !saw_header_line {
                    return Ok(None);
                }
                return Err(CodecError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "EOF while reading packet headers",
                )));
            };
            saw_header_line = true;

            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                break;
            }

            let Some((name, value)) = trimmed.split_once(':') else {
                continue;
            };

            if name.eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                content_length = Some(value.parse::<usize>().map_err(|_| {
                    CodecError::Framing(format!("invalid Content-Length {value:?}"))
                })?);
            }
        }

        let Some(len) = content_length else {
            return Err(CodecError::Framing("missing Content-Length header".to_owned()));
        };
        if len > MAX_PACKET_BYTES {
            return Err(CodecError::Framing(format!(
                "Content-Length {len} exceeds maximum allowed size {MAX_PACKET_BYTES}"
            )));
        }

        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).await?;
        Ok(Some(serde_json::from_slice::<Value>(&buf)?))
    }
}

pub struct PacketWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_value(&mut self, value: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.writer
            .write_all(format!("Content-Length: {}\r\n\r\n", bytes.len()).as_bytes())
            .await?;
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
