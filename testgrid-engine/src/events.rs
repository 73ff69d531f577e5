//! The caller-facing event sink

use testgrid_ipc::{
    DiscoveryComplete, ExecutionComplete, LogSeverity, RunStatistics, TestCase, TestResult,
};

/// Callbacks through which the engine reports progress and completion
///
/// Implementations must tolerate being called from any worker task. All
/// callbacks default to no-ops so callers implement only what they consume.
/// Exactly one terminal callback (`on_discovery_complete` or
/// `on_execution_complete`) fires per logical request.
pub trait TestSessionEvents: Send + Sync {
    /// A batch of discovered test cases
    fn on_test_cases_found(&self, _test_cases: &[TestCase]) {}

    /// Fresh results plus updated run counters
    fn on_stats_change(&self, _new_results: &[TestResult], _stats: &RunStatistics) {}

    /// Pass-through protocol payload for diagnostic logging
    fn on_raw_message(&self, _payload: &str) {}

    /// Engine or host log output at a severity
    fn on_log_message(&self, _level: LogSeverity, _message: &str) {}

    /// Terminal event of a discovery request
    fn on_discovery_complete(&self, _result: &DiscoveryComplete) {}

    /// Terminal event of an execution request
    fn on_execution_complete(&self, _result: &ExecutionComplete) {}
}
