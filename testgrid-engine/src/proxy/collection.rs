//! Data-collection decoration around an execution manager

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::warn;

use testgrid_ipc::{
    AttachmentSet, DiscoveryComplete, ExecutionComplete, LogSeverity, RunCriteria, RunStatistics,
    TestCase, TestResult,
};

use crate::error::EngineError;
use crate::events::TestSessionEvents;
use crate::proxy::execution::TestExecutionManager;

/// Collector hooks around one execution run
///
/// What a collector actually does is its own business; the engine only
/// brackets the run with these notifications and carries the artifacts.
#[async_trait]
pub trait DataCollector: Send + Sync {
    fn display_name(&self) -> &str;

    /// Collection session is starting; returned parameters are merged into
    /// the outbound run settings
    async fn session_started(&self) -> Result<Vec<(String, String)>, EngineError>;

    /// Collection session ended; returned artifact sets are attached to the
    /// terminal event
    async fn session_ended(&self) -> Result<Vec<AttachmentSet>, EngineError>;
}

/// Wraps an execution manager with collector start/stop notifications
///
/// Adds lifecycle hooks, not protocol changes: streamed events pass through
/// untouched, and abort/close forward unchanged to the wrapped manager.
pub struct CollectingExecutionManager {
    inner: Arc<dyn TestExecutionManager>,
    collectors: Vec<Arc<dyn DataCollector>>,
}

impl CollectingExecutionManager {
    pub fn new(
        inner: Arc<dyn TestExecutionManager>,
        collectors: Vec<Arc<dyn DataCollector>>,
    ) -> Self {
        Self { inner, collectors }
    }
}

/// Merge collector parameters into the opaque run settings document
fn augment_run_settings(criteria: &RunCriteria, parameters: Vec<(String, String)>) -> RunCriteria {
    if parameters.is_empty() {
        return criteria.clone();
    }

    let mut criteria = criteria.clone();
    let mut settings = match std::mem::replace(&mut criteria.run_settings, JsonValue::Null) {
        JsonValue::Object(map) => map,
        JsonValue::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("settings".to_string(), other);
            map
        }
    };

    let collector_parameters = settings
        .entry("collector_parameters")
        .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
    if let Some(object) = collector_parameters.as_object_mut() {
        for (key, value) in parameters {
            object.insert(key, JsonValue::String(value));
        }
    }

    criteria.run_settings = JsonValue::Object(settings);
    criteria
}

/// Forwards streamed events and holds back the terminal for the decorator
struct InterceptTerminalEvents {
    caller: Arc<dyn TestSessionEvents>,
    terminal: StdMutex<Option<ExecutionComplete>>,
}

impl InterceptTerminalEvents {
    fn take(&self) -> Option<ExecutionComplete> {
        self.terminal.lock().expect("terminal slot poisoned").take()
    }
}

impl TestSessionEvents for InterceptTerminalEvents {
    fn on_test_cases_found(&self, test_cases: &[TestCase]) {
        self.caller.on_test_cases_found(test_cases);
    }

    fn on_stats_change(&self, new_results: &[TestResult], stats: &RunStatistics) {
        self.caller.on_stats_change(new_results, stats);
    }

    fn on_raw_message(&self, payload: &str) {
        self.caller.on_raw_message(payload);
    }

    fn on_log_message(&self, level: LogSeverity, message: &str) {
        self.caller.on_log_message(level, message);
    }

    fn on_discovery_complete(&self, result: &DiscoveryComplete) {
        self.caller.on_discovery_complete(result);
    }

    fn on_execution_complete(&self, result: &ExecutionComplete) {
        *self.terminal.lock().expect("terminal slot poisoned") = Some(result.clone());
    }
}

#[async_trait]
impl TestExecutionManager for CollectingExecutionManager {
    async fn run_tests(&self, criteria: &RunCriteria, events: Arc<dyn TestSessionEvents>) {
        let mut parameters = Vec::new();
        for collector in &self.collectors {
            match collector.session_started().await {
                Ok(settings) => parameters.extend(settings),
                Err(e) => {
                    warn!(
                        "Data collector {} failed to start: {}",
                        collector.display_name(),
                        e
                    );
                }
            }
        }

        let criteria = augment_run_settings(criteria, parameters);
        let intercept = Arc::new(InterceptTerminalEvents {
            caller: events.clone(),
            terminal: StdMutex::new(None),
        });

        self.inner.run_tests(&criteria, intercept.clone()).await;

        let mut result = intercept.take().unwrap_or_else(ExecutionComplete::aborted);
        for collector in &self.collectors {
            match collector.session_ended().await {
                Ok(attachments) => result.attachments.extend(attachments),
                Err(e) => {
                    warn!(
                        "Data collector {} failed to finish: {}",
                        collector.display_name(),
                        e
                    );
                }
            }
        }

        events.on_execution_complete(&result);
    }

    async fn abort(&self) {
        self.inner.abort().await;
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
