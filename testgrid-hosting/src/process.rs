//! Process-backed test host provider

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, error, warn};
use uuid::Uuid;

use testgrid_ipc::HostConnection;

use crate::error::HostingError;
use crate::extensions::dedup_ordered;
use crate::provider::{HostLaunchedEvent, HostStartInfo, TestHostProvider};

const LAUNCH_EVENT_BUFFER: usize = 8;

/// Configuration for process-backed test hosts
#[derive(Debug, Clone)]
pub struct ProcessHostConfig {
    /// Host program to spawn
    pub program: String,
    /// Arguments passed ahead of the source list
    pub args: Vec<String>,
    /// Whether one host may serve multiple sequential batches
    pub shared: bool,
    /// Adapter extensions every host of this kind loads
    pub default_extensions: Vec<String>,
    /// Grace period before a lingering host is killed
    pub terminate_timeout: Duration,
}

impl Default for ProcessHostConfig {
    fn default() -> Self {
        Self {
            program: "testgrid-host".to_string(),
            args: Vec::new(),
            shared: false,
            default_extensions: Vec::new(),
            terminate_timeout: Duration::from_millis(500),
        }
    }
}

/// Launches the configured host program with piped stdio and hands the
/// resulting [`HostConnection`] to the session channel through a one-shot
pub struct ProcessTestHostProvider {
    host_id: String,
    config: ProcessHostConfig,
    child: Mutex<Option<Child>>,
    connection_tx: Mutex<Option<oneshot::Sender<HostConnection>>>,
    launched_tx: broadcast::Sender<HostLaunchedEvent>,
}

impl ProcessTestHostProvider {
    /// Create a provider and the receiving end of its connection handoff
    pub fn new(config: ProcessHostConfig) -> (Self, oneshot::Receiver<HostConnection>) {
        let (connection_tx, connection_rx) = oneshot::channel();
        let (launched_tx, _) = broadcast::channel(LAUNCH_EVENT_BUFFER);

        let provider = Self {
            host_id: format!("host-{}", Uuid::new_v4()),
            config,
            child: Mutex::new(None),
            connection_tx: Mutex::new(Some(connection_tx)),
            launched_tx,
        };

        (provider, connection_rx)
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }
}

#[async_trait]
impl TestHostProvider for ProcessTestHostProvider {
    fn start_info(&self, sources: &[String]) -> HostStartInfo {
        let mut args = self.config.args.clone();
        args.extend(sources.iter().cloned());
        HostStartInfo::new(&self.config.program).with_args(args)
    }

    async fn launch(&self, start_info: HostStartInfo) -> Result<bool, HostingError> {
        debug!("Spawning test host {}: {:?}", self.host_id, start_info.program);

        let mut cmd = Command::new(&start_info.program);
        cmd.args(&start_info.args)
            .envs(&start_info.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &start_info.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| HostingError::SpawnError(format!("Failed to spawn test host: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HostingError::SpawnError("Failed to get host stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostingError::SpawnError("Failed to get host stdout".to_string()))?;

        let pid = child.id();
        *self.child.lock().await = Some(child);

        // Advisory readiness signal; the returned boolean stays authoritative
        let _ = self.launched_tx.send(HostLaunchedEvent {
            host_id: self.host_id.clone(),
            pid,
        });

        let connection = HostConnection::new(stdin, stdout);
        let tx = self.connection_tx.lock().await.take();
        match tx {
            Some(tx) => {
                if tx.send(connection).is_err() {
                    warn!("Host {} connection receiver dropped before handoff", self.host_id);
                    return Ok(false);
                }
            }
            None => {
                error!("Host {} launched twice", self.host_id);
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn is_shared(&self) -> bool {
        self.config.shared
    }

    fn extensions(&self, _sources: &[String], additional: &[String]) -> Vec<String> {
        dedup_ordered(
            self.config
                .default_extensions
                .iter()
                .cloned()
                .chain(additional.iter().cloned()),
        )
    }

    fn launch_events(&self) -> broadcast::Receiver<HostLaunchedEvent> {
        self.launched_tx.subscribe()
    }

    async fn terminate(&self) {
        let child = self.child.lock().await.take();
        let Some(mut child) = child else {
            debug!("Host {} terminate requested but nothing is running", self.host_id);
            return;
        };

        match tokio::time::timeout(self.config.terminate_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Host {} exited with {}", self.host_id, status);
            }
            Ok(Err(e)) => {
                debug!("Host {} wait failed: {}", self.host_id, e);
            }
            Err(_) => {
                debug!("Host {} didn't exit in time, killing", self.host_id);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill host {}: {}", self.host_id, e);
                }
            }
        }
    }
}
