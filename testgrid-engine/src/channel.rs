//! The session channel to one test host

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use testgrid_ipc::{
    DiscoveryComplete, DiscoveryCriteria, ExecutionComplete, HostConnection, HostEvent,
    HostEventReader, HostRequest, HostRequestWriter, IpcError, RunCriteria, PROTOCOL_VERSION,
};

use crate::events::TestSessionEvents;

/// Bidirectional request/event conduit to one test host
///
/// The conduit is assumed reliable while the host lives and fails as a
/// whole on disconnect. `run_discovery`/`run_execution` pump streamed
/// events into the sink and resolve with the terminal payload, so callers
/// can tear the session down before forwarding it.
#[async_trait]
pub trait SessionChannel: Send + Sync {
    /// Block until the host's request handler is connected, up to `timeout`
    async fn wait_for_connection(&self, timeout: Duration) -> bool;

    /// Protocol version handshake
    async fn initialize_communication(&self) -> Result<(), IpcError>;

    async fn initialize_discovery(&self, extension_paths: &[String]) -> Result<(), IpcError>;

    async fn initialize_execution(&self, extension_paths: &[String]) -> Result<(), IpcError>;

    /// Issue a discovery request and pump events until the host reports
    /// the unit terminal
    async fn run_discovery(
        &self,
        criteria: &DiscoveryCriteria,
        events: &dyn TestSessionEvents,
    ) -> Result<DiscoveryComplete, IpcError>;

    /// Issue an execution request and pump events until the host reports
    /// the unit terminal
    async fn run_execution(
        &self,
        criteria: &RunCriteria,
        events: &dyn TestSessionEvents,
    ) -> Result<ExecutionComplete, IpcError>;

    /// Ask the host to stop in-flight work; safe before a connection exists
    async fn abort(&self);

    /// Tear the conduit down; safe to call repeatedly
    async fn close(&self);
}

/// Session channel over a host process's piped stdio
///
/// The connection arrives through a one-shot handoff from the host
/// provider once the process is spawned. Writer and reader halves are
/// locked independently so an abort can be written while the event pump
/// holds the reader.
pub struct StdioSessionChannel {
    pending: StdMutex<Option<oneshot::Receiver<HostConnection>>>,
    writer: Mutex<Option<HostRequestWriter>>,
    reader: Mutex<Option<HostEventReader>>,
}

impl StdioSessionChannel {
    pub fn new(connection_rx: oneshot::Receiver<HostConnection>) -> Self {
        Self {
            pending: StdMutex::new(Some(connection_rx)),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    async fn send(&self, request: HostRequest) -> Result<(), IpcError> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(writer) => writer.send(request).await,
            None => Err(IpcError::NotConnected),
        }
    }
}

#[async_trait]
impl SessionChannel for StdioSessionChannel {
    async fn wait_for_connection(&self, timeout: Duration) -> bool {
        let rx = self.pending.lock().expect("channel state poisoned").take();
        let Some(rx) = rx else {
            // Handoff already consumed; connected if the halves are present
            return self.writer.lock().await.is_some();
        };

        let connected = tokio::time::timeout(timeout, async {
            let connection = rx.await.ok()?;
            let (writer, mut reader) = connection.split();
            match reader.receive().await {
                Ok(HostEvent::Connected { host_id, version }) => {
                    debug!("Test host {} connected (protocol v{})", host_id, version);
                    Some((writer, reader))
                }
                Ok(other) => {
                    warn!("Expected connection handshake, got {:?}", other);
                    None
                }
                Err(e) => {
                    warn!("Connection handshake failed: {}", e);
                    None
                }
            }
        })
        .await;

        match connected {
            Ok(Some((writer, reader))) => {
                *self.writer.lock().await = Some(writer);
                *self.reader.lock().await = Some(reader);
                true
            }
            Ok(None) => false,
            Err(_) => {
                debug!("Timed out waiting for test host connection");
                false
            }
        }
    }

    async fn initialize_communication(&self) -> Result<(), IpcError> {
        self.send(HostRequest::CheckVersion {
            version: PROTOCOL_VERSION,
        })
        .await?;

        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().ok_or(IpcError::NotConnected)?;
        match reader.receive().await? {
            HostEvent::VersionAck { version } if version == PROTOCOL_VERSION => Ok(()),
            HostEvent::VersionAck { version } => Err(IpcError::ProtocolVersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: version,
            }),
            other => Err(IpcError::InvalidMessage(format!(
                "expected version ack, got {:?}",
                other
            ))),
        }
    }

    async fn initialize_discovery(&self, extension_paths: &[String]) -> Result<(), IpcError> {
        self.send(HostRequest::InitializeDiscovery {
            extension_paths: extension_paths.to_vec(),
        })
        .await
    }

    async fn initialize_execution(&self, extension_paths: &[String]) -> Result<(), IpcError> {
        self.send(HostRequest::InitializeExecution {
            extension_paths: extension_paths.to_vec(),
        })
        .await
    }

    async fn run_discovery(
        &self,
        criteria: &DiscoveryCriteria,
        events: &dyn TestSessionEvents,
    ) -> Result<DiscoveryComplete, IpcError> {
        self.send(HostRequest::StartDiscovery {
            criteria: criteria.clone(),
        })
        .await?;

        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().ok_or(IpcError::NotConnected)?;
        loop {
            match reader.receive().await? {
                HostEvent::TestCasesFound { test_cases } => events.on_test_cases_found(&test_cases),
                HostEvent::LogMessage { level, message } => events.on_log_message(level, &message),
                HostEvent::RawMessage { payload } => events.on_raw_message(&payload),
                HostEvent::DiscoveryComplete { result } => return Ok(result),
                other => debug!("Ignoring unexpected host event during discovery: {:?}", other),
            }
        }
    }

    async fn run_execution(
        &self,
        criteria: &RunCriteria,
        events: &dyn TestSessionEvents,
    ) -> Result<ExecutionComplete, IpcError> {
        self.send(HostRequest::StartExecution {
            criteria: criteria.clone(),
        })
        .await?;

        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().ok_or(IpcError::NotConnected)?;
        loop {
            match reader.receive().await? {
                HostEvent::StatsChange { new_results, stats } => {
                    events.on_stats_change(&new_results, &stats)
                }
                HostEvent::LogMessage { level, message } => events.on_log_message(level, &message),
                HostEvent::RawMessage { payload } => events.on_raw_message(&payload),
                HostEvent::ExecutionComplete { result } => return Ok(result),
                other => debug!("Ignoring unexpected host event during execution: {:?}", other),
            }
        }
    }

    async fn abort(&self) {
        if let Err(e) = self.send(HostRequest::Abort).await {
            debug!("Abort not delivered: {}", e);
        }
    }

    async fn close(&self) {
        // Drop a never-claimed handoff so a late launch fails cleanly
        self.pending.lock().expect("channel state poisoned").take();

        if let Err(e) = self.send(HostRequest::Close).await {
            debug!("Close not delivered: {}", e);
        }

        *self.writer.lock().await = None;
        *self.reader.lock().await = None;
    }
}
