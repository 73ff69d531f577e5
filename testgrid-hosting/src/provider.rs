//! The test host provider capability

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::HostingError;

/// Everything needed to start one test host process
#[derive(Debug, Clone)]
pub struct HostStartInfo {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl HostStartInfo {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Advisory notification that a host process came up
///
/// This is the readiness half of the two-step launch protocol; the boolean
/// resolved by [`TestHostProvider::launch`] remains authoritative. A
/// provider may emit this event and still resolve the launch as failed.
#[derive(Debug, Clone)]
pub struct HostLaunchedEvent {
    pub host_id: String,
    pub pid: Option<u32>,
}

/// Capability that launches and tears down test host processes
///
/// Implementations decide what a host actually is: the process-backed
/// default spawns the configured program, test doubles fake the lifecycle.
#[async_trait]
pub trait TestHostProvider: Send + Sync {
    /// Build the start info for a host that will operate on `sources`
    fn start_info(&self, sources: &[String]) -> HostStartInfo;

    /// Launch the host; `Ok(false)` is a clean launch failure
    async fn launch(&self, start_info: HostStartInfo) -> Result<bool, HostingError>;

    /// Whether one host may run multiple sequential work batches
    fn is_shared(&self) -> bool;

    /// Platform-specific extension set for the given sources, merged with
    /// the caller's additional paths, ordered and distinct
    fn extensions(&self, sources: &[String], additional: &[String]) -> Vec<String>;

    /// Subscribe to advisory host-launched notifications
    fn launch_events(&self) -> broadcast::Receiver<HostLaunchedEvent>;

    /// Request host termination; must be safe when nothing was launched
    async fn terminate(&self);
}
