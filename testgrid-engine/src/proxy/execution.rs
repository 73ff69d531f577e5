//! Execution over one test host session

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::error;

use testgrid_hosting::ExtensionCache;
use testgrid_ipc::{ExecutionComplete, LogSeverity, RunCriteria};

use crate::events::TestSessionEvents;
use crate::proxy::operation::{InitializeKind, ProxyOperationManager, ProxySession};

/// Capability of running test execution
///
/// Mirrors [`TestDiscoveryManager`](crate::proxy::discovery::TestDiscoveryManager):
/// the future resolves only after exactly one terminal event has been
/// delivered through the sink.
#[async_trait]
pub trait TestExecutionManager: Send + Sync {
    async fn run_tests(&self, criteria: &RunCriteria, events: Arc<dyn TestSessionEvents>);

    async fn abort(&self);

    async fn close(&self);
}

/// Drives the execution protocol against one test host session
pub struct ProxyExecutionManager {
    ops: ProxyOperationManager,
    reusable: bool,
}

impl ProxyExecutionManager {
    pub fn new(
        session: ProxySession,
        extension_cache: Arc<ExtensionCache>,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            ops: ProxyOperationManager::new(session, extension_cache, connection_timeout),
            reusable: false,
        }
    }

    /// A manager whose session stays open between units, for shared hosts
    /// driven by the parallel orchestrator
    pub fn new_reusable(
        session: ProxySession,
        extension_cache: Arc<ExtensionCache>,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            ops: ProxyOperationManager::new(session, extension_cache, connection_timeout),
            reusable: true,
        }
    }
}

#[async_trait]
impl TestExecutionManager for ProxyExecutionManager {
    async fn run_tests(&self, criteria: &RunCriteria, events: Arc<dyn TestSessionEvents>) {
        if criteria.is_empty() {
            events.on_log_message(
                LogSeverity::Error,
                "Execution request rejected: nothing to run",
            );
            events.on_execution_complete(&ExecutionComplete::empty());
            return;
        }

        let sources = criteria.sources();
        if !self.ops.setup_channel(&sources).await {
            events.on_log_message(
                LogSeverity::Error,
                "Could not start a test host session for execution",
            );
            self.ops.close().await;
            events.on_execution_complete(&ExecutionComplete::aborted());
            return;
        }

        if !self.ops.cache_is_empty() {
            self.ops
                .initialize_extensions(InitializeKind::Execution, &sources)
                .await;
        }

        self.ops.mark_busy();
        match self.ops.channel().run_execution(criteria, events.as_ref()).await {
            Ok(result) => {
                self.ops.finish_unit(result.aborted, self.reusable);
                if !self.reusable {
                    self.ops.close().await;
                }
                events.on_execution_complete(&result);
            }
            Err(e) => {
                error!("Execution session lost: {}", e);
                self.ops.mark_communication_failed();
                self.ops.close().await;
                events.on_log_message(
                    LogSeverity::Error,
                    &format!("Test host communication failed: {}", e),
                );
                events.on_execution_complete(&ExecutionComplete::aborted());
            }
        }
    }

    async fn abort(&self) {
        self.ops.abort().await;
    }

    async fn close(&self) {
        self.ops.close().await;
    }
}
