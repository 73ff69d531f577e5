//! Hosting error types

use thiserror::Error;

/// Test host lifecycle errors
#[derive(Debug, Error)]
pub enum HostingError {
    #[error("Failed to spawn test host: {0}")]
    SpawnError(String),

    #[error("Test host is not running")]
    NotRunning,

    #[error("Host communication error: {0}")]
    CommunicationError(String),

    #[error("IPC error: {0}")]
    IpcError(String),
}

impl From<testgrid_ipc::IpcError> for HostingError {
    fn from(err: testgrid_ipc::IpcError) -> Self {
        Self::IpcError(err.to_string())
    }
}
