//! Newline-delimited JSON transports for coordinator/host communication

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::error::IpcError;
use crate::protocol::{HostEvent, HostRequest, MessageEnvelope, PROTOCOL_VERSION};

/// Writes message envelopes as JSON lines
pub struct MessageWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> MessageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Send one envelope, newline-delimited and flushed
    pub async fn send<T: Serialize>(&mut self, message: T) -> Result<(), IpcError> {
        let envelope = MessageEnvelope::new(message);
        let json =
            serde_json::to_string(&envelope).map_err(|e| IpcError::SerializationError(e.to_string()))?;

        let line = format!("{}\n", json);
        self.inner
            .write_all(line.as_bytes())
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;
        self.inner
            .flush()
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;

        Ok(())
    }
}

/// Reads message envelopes from JSON lines through a persistent buffered reader
pub struct MessageReader<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin + Send> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            line: String::new(),
        }
    }

    /// Receive one envelope; fails with `ConnectionClosed` on EOF and
    /// `ProtocolVersionMismatch` when the peer speaks another version
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<T, IpcError> {
        self.line.clear();

        let read = self
            .reader
            .read_line(&mut self.line)
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;

        if read == 0 {
            return Err(IpcError::ConnectionClosed);
        }

        let trimmed = self.line.trim_end();
        let envelope: MessageEnvelope<T> = serde_json::from_str(trimmed)
            .map_err(|e| IpcError::DeserializationError(e.to_string()))?;

        if envelope.protocol_version != PROTOCOL_VERSION {
            return Err(IpcError::ProtocolVersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: envelope.protocol_version,
            });
        }

        Ok(envelope.message)
    }
}

/// Coordinator-side connection to one host process's stdio
pub struct HostConnection {
    writer: MessageWriter<tokio::process::ChildStdin>,
    reader: MessageReader<tokio::process::ChildStdout>,
}

impl HostConnection {
    pub fn new(stdin: tokio::process::ChildStdin, stdout: tokio::process::ChildStdout) -> Self {
        Self {
            writer: MessageWriter::new(stdin),
            reader: MessageReader::new(stdout),
        }
    }

    /// Split into independently lockable halves so aborts can be written
    /// while the event pump holds the reader
    pub fn split(self) -> (HostRequestWriter, HostEventReader) {
        (
            HostRequestWriter {
                writer: self.writer,
            },
            HostEventReader {
                reader: self.reader,
            },
        )
    }
}

/// Write half of a [`HostConnection`]
pub struct HostRequestWriter {
    writer: MessageWriter<tokio::process::ChildStdin>,
}

impl HostRequestWriter {
    pub async fn send(&mut self, request: HostRequest) -> Result<(), IpcError> {
        debug!("Sending host request: {:?}", request);
        self.writer.send(request).await
    }
}

/// Read half of a [`HostConnection`]
pub struct HostEventReader {
    reader: MessageReader<tokio::process::ChildStdout>,
}

impl HostEventReader {
    pub async fn receive(&mut self) -> Result<HostEvent, IpcError> {
        self.reader.receive().await
    }
}

/// Host-side transport over the process's own stdin/stdout
pub struct StdioTransport {
    writer: MessageWriter<tokio::io::Stdout>,
    reader: MessageReader<tokio::io::Stdin>,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            writer: MessageWriter::new(tokio::io::stdout()),
            reader: MessageReader::new(tokio::io::stdin()),
        }
    }

    pub async fn send_event(&mut self, event: HostEvent) -> Result<(), IpcError> {
        self.writer.send(event).await
    }

    pub async fn receive_request(&mut self) -> Result<HostRequest, IpcError> {
        self.reader.receive().await
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}
