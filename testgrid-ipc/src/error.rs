//! IPC error types

use thiserror::Error;

/// IPC error types
#[derive(Debug, Error)]
pub enum IpcError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Connection closed by the peer
    #[error("Connection closed")]
    ConnectionClosed,

    /// Protocol version mismatch
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },

    /// Timed out waiting for the peer
    #[error("Timeout waiting for peer")]
    Timeout,

    /// Invalid message for the current session phase
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Transport not connected
    #[error("Transport not connected")]
    NotConnected,
}

impl IpcError {
    /// Check if this error means the peer is gone for good
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            IpcError::ConnectionClosed | IpcError::IoError(_) | IpcError::NotConnected
        )
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        IpcError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            IpcError::IoError(err.to_string())
        } else if err.is_data() {
            IpcError::DeserializationError(err.to_string())
        } else {
            IpcError::SerializationError(err.to_string())
        }
    }
}
