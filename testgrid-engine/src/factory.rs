//! Engine entry point: selects and composes the concrete managers

use std::sync::Arc;

use tracing::debug;

use testgrid_config::{EngineConfig, HostingConfig};
use testgrid_hosting::{ExtensionCache, ProcessHostConfig, ProcessTestHostProvider};
use testgrid_ipc::{DiscoveryCriteria, RunCriteria};

use crate::channel::StdioSessionChannel;
use crate::parallel::{ParallelDiscoveryManager, ParallelExecutionManager};
use crate::proxy::collection::{CollectingExecutionManager, DataCollector};
use crate::proxy::discovery::{ProxyDiscoveryManager, TestDiscoveryManager};
use crate::proxy::execution::{ProxyExecutionManager, TestExecutionManager};
use crate::proxy::operation::ProxySession;

/// Creates provider/channel pairs for new host sessions
///
/// The parallel orchestrator mints a fresh session per unit for non-shared
/// hosts, so session creation has to be a capability rather than a value.
pub trait SessionFactory: Send + Sync {
    fn create_session(&self) -> ProxySession;

    /// Whether sessions from this factory may serve multiple batches
    fn is_shared(&self) -> bool;
}

/// Session factory over process-backed hosts speaking stdio JSON
pub struct ProcessSessionFactory {
    config: ProcessHostConfig,
}

impl ProcessSessionFactory {
    pub fn new(config: ProcessHostConfig) -> Self {
        Self { config }
    }

    pub fn from_config(hosting: &HostingConfig) -> Self {
        Self::new(ProcessHostConfig {
            program: hosting.host_program.clone(),
            args: hosting.host_args.clone(),
            shared: hosting.shared,
            default_extensions: hosting.default_extensions.clone(),
            terminate_timeout: hosting.terminate_timeout,
        })
    }
}

impl SessionFactory for ProcessSessionFactory {
    fn create_session(&self) -> ProxySession {
        let (provider, connection_rx) = ProcessTestHostProvider::new(self.config.clone());
        ProxySession {
            provider: Arc::new(provider),
            channel: Arc::new(StdioSessionChannel::new(connection_rx)),
        }
    }

    fn is_shared(&self) -> bool {
        self.config.shared
    }
}

/// Chooses the concrete manager composition from run configuration
///
/// Parallel orchestration engages only when the caller opted in and there
/// is more than one unit of work; data collection is a decorator composed
/// around the execution manager when enabled.
pub struct TestEngine {
    config: EngineConfig,
    extension_cache: Arc<ExtensionCache>,
}

impl TestEngine {
    pub fn new(config: EngineConfig, extension_cache: Arc<ExtensionCache>) -> Self {
        Self {
            config,
            extension_cache,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default(), Arc::new(ExtensionCache::new()))
    }

    pub fn extension_cache(&self) -> &Arc<ExtensionCache> {
        &self.extension_cache
    }

    /// Obtain the discovery manager for one logical request
    pub fn discovery_manager(
        &self,
        sessions: Arc<dyn SessionFactory>,
        criteria: &DiscoveryCriteria,
    ) -> Arc<dyn TestDiscoveryManager> {
        if criteria.parallelism.enabled && criteria.sources.len() > 1 {
            debug!(
                "Selecting parallel discovery manager for {} sources",
                criteria.sources.len()
            );
            Arc::new(ParallelDiscoveryManager::new(
                sessions,
                self.extension_cache.clone(),
                self.config.connection_timeout,
                self.config.max_parallel_hosts,
            ))
        } else {
            Arc::new(ProxyDiscoveryManager::new(
                sessions.create_session(),
                self.extension_cache.clone(),
                self.config.connection_timeout,
            ))
        }
    }

    /// Obtain the execution manager for one logical request
    pub fn execution_manager(
        &self,
        sessions: Arc<dyn SessionFactory>,
        criteria: &RunCriteria,
        collectors: Vec<Arc<dyn DataCollector>>,
    ) -> Arc<dyn TestExecutionManager> {
        let base: Arc<dyn TestExecutionManager> =
            if criteria.parallelism.enabled && criteria.sources().len() > 1 {
                debug!(
                    "Selecting parallel execution manager for {} sources",
                    criteria.sources().len()
                );
                Arc::new(ParallelExecutionManager::new(
                    sessions,
                    self.extension_cache.clone(),
                    self.config.connection_timeout,
                    self.config.max_parallel_hosts,
                ))
            } else {
                Arc::new(ProxyExecutionManager::new(
                    sessions.create_session(),
                    self.extension_cache.clone(),
                    self.config.connection_timeout,
                ))
            };

        let collectors = if self.config.data_collection {
            collectors
        } else {
            Vec::new()
        };
        if collectors.is_empty() {
            base
        } else {
            Arc::new(CollectingExecutionManager::new(base, collectors))
        }
    }
}
