//! Discovery over one test host session

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::error;

use testgrid_hosting::ExtensionCache;
use testgrid_ipc::{DiscoveryComplete, DiscoveryCriteria, LogSeverity};

use crate::events::TestSessionEvents;
use crate::proxy::operation::{InitializeKind, ProxyOperationManager, ProxySession};

/// Capability of running test discovery
///
/// `discover_tests` reports every outcome through the sink: the future
/// resolves only after exactly one terminal event has been delivered, and
/// failures never surface as errors to the caller.
#[async_trait]
pub trait TestDiscoveryManager: Send + Sync {
    async fn discover_tests(
        &self,
        criteria: &DiscoveryCriteria,
        events: Arc<dyn TestSessionEvents>,
    );

    async fn abort(&self);

    async fn close(&self);
}

/// Drives the discovery protocol against one test host session
pub struct ProxyDiscoveryManager {
    ops: ProxyOperationManager,
    reusable: bool,
}

impl ProxyDiscoveryManager {
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
    /// driven by the parallel orchestrator; the orchestrator closes it once
    /// its slot runs dry
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
impl TestDiscoveryManager for ProxyDiscoveryManager {
    async fn discover_tests(
        &self,
        criteria: &DiscoveryCriteria,
        events: Arc<dyn TestSessionEvents>,
    ) {
        if criteria.sources.is_empty() {
            events.on_log_message(
                LogSeverity::Error,
                "Discovery request rejected: no test sources",
            );
            events.on_discovery_complete(&DiscoveryComplete::empty());
            return;
        }

        if !self.ops.setup_channel(&criteria.sources).await {
            events.on_log_message(
                LogSeverity::Error,
                "Could not start a test host session for discovery",
            );
            self.ops.close().await;
            events.on_discovery_complete(&DiscoveryComplete::aborted());
            return;
        }

        if !self.ops.cache_is_empty() {
            self.ops
                .initialize_extensions(InitializeKind::Discovery, &criteria.sources)
                .await;
        }

        self.ops.mark_busy();
        match self.ops.channel().run_discovery(criteria, events.as_ref()).await {
            Ok(result) => {
                self.ops.finish_unit(result.aborted, self.reusable);
                if !self.reusable {
                    self.ops.close().await;
                }
                events.on_discovery_complete(&result);
            }
            Err(e) => {
                error!("Discovery session lost: {}", e);
                self.ops.mark_communication_failed();
                self.ops.close().await;
                events.on_log_message(
                    LogSeverity::Error,
                    &format!("Test host communication failed: {}", e),
                );
                events.on_discovery_complete(&DiscoveryComplete::aborted());
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
