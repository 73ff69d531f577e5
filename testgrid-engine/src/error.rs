//! Engine error types

use thiserror::Error;

/// Orchestration engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Hosting error: {0}")]
    HostingError(String),

    #[error("Data collector error: {0}")]
    CollectorError(String),
}

impl From<testgrid_ipc::IpcError> for EngineError {
    fn from(err: testgrid_ipc::IpcError) -> Self {
        Self::IpcError(err.to_string())
    }
}

impl From<testgrid_hosting::HostingError> for EngineError {
    fn from(err: testgrid_hosting::HostingError) -> Self {
        Self::HostingError(err.to_string())
    }
}
