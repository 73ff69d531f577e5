//! Testgrid orchestration engine
//!
//! This crate owns the lifecycle of test host sessions and fans logical
//! discovery/execution requests out across them: the proxy managers drive a
//! single session from launch through completion, the parallel orchestrator
//! pools sessions and load-balances remaining work, and the engine factory
//! picks the right composition from run configuration.

pub mod channel;
pub mod error;
pub mod events;
pub mod factory;
pub mod parallel;
pub mod proxy;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types
pub use channel::{SessionChannel, StdioSessionChannel};
pub use error::EngineError;
pub use events::TestSessionEvents;
pub use factory::{ProcessSessionFactory, SessionFactory, TestEngine};
pub use parallel::{ParallelDiscoveryManager, ParallelExecutionManager};
pub use proxy::collection::{CollectingExecutionManager, DataCollector};
pub use proxy::discovery::{ProxyDiscoveryManager, TestDiscoveryManager};
pub use proxy::execution::{ProxyExecutionManager, TestExecutionManager};
pub use proxy::operation::{ProxyOperationManager, ProxySession, SessionState};
