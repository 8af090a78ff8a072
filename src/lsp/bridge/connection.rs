//! LSP base-protocol framing over arbitrary byte streams.
//!
//! Format: `Content-Length: N\r\n\r\n{json}`. Other headers (such as
//! `Content-Type`) are accepted and ignored on read.

use std::io;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::lsp::transport::{BoxedReader, BoxedWriter};

/// Upper bound on a single message body.
const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// Reading half of a framed connection.
pub(crate) struct BridgeReader {
    inner: BufReader<BoxedReader>,
}

impl BridgeReader {
    pub(crate) fn new(reader: BoxedReader) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Read the next message.
    ///
    /// EOF before a header is reported as `UnexpectedEof`.
    pub(crate) async fn read_message(&mut self) -> io::Result<Value> {
        read_message(&mut self.inner).await
    }
}

/// Writing half of a framed connection.
pub(crate) struct BridgeWriter {
    inner: BoxedWriter,
}

impl BridgeWriter {
    pub(crate) fn new(writer: BoxedWriter) -> Self {
        Self { inner: writer }
    }

    pub(crate) async fn write_message(&mut self, message: &Value) -> io::Result<()> {
        write_message(&mut self.inner, message).await
    }

    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

pub(crate) async fn write_message<W>(writer: &mut W, message: &Value) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let body = serde_json::to_vec(message).map_err(io::Error::other)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

pub(crate) async fn read_message<R>(reader: &mut BufReader<R>) -> io::Result<Value>
where
    R: AsyncRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                if saw_header {
                    "bridge: stream closed inside message header"
                } else {
                    "bridge: stream closed"
                },
            ));
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if saw_header {
                break;
            }
            // Stray blank line between messages
            continue;
        }
        saw_header = true;

        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("Content-Length")
        {
            let length = value.trim().parse::<usize>().map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bridge: invalid Content-Length {:?}: {}", value.trim(), e),
                )
            })?;
            content_length = Some(length);
        }
    }

    let length = content_length.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            "bridge: message without Content-Length header",
        )
    })?;
    if length > MAX_CONTENT_LENGTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bridge: message of {} bytes exceeds limit", length),
        ));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bridge: invalid JSON body: {}", e),
        )
    })
}
