//! Wire protocol definitions and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// A single test case discovered in a test source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    pub id: Uuid,
    pub fully_qualified_name: String,
    pub display_name: String,
    /// Test source (container) the case was discovered in
    pub source: String,
    /// URI of the adapter able to execute this case
    pub executor_uri: String,
}

impl TestCase {
    /// Create a test case with a fresh identity
    pub fn new(
        fully_qualified_name: impl Into<String>,
        source: impl Into<String>,
        executor_uri: impl Into<String>,
    ) -> Self {
        let fully_qualified_name = fully_qualified_name.into();
        Self {
            id: Uuid::new_v4(),
            display_name: fully_qualified_name.clone(),
            fully_qualified_name,
            source: source.into(),
            executor_uri: executor_uri.into(),
        }
    }
}

/// Outcome of one executed test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    Failed,
    Skipped,
    NotFound,
}

/// Result of one executed test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test_case: TestCase,
    pub outcome: TestOutcome,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

/// Counters accumulated over an execution run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub executed: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl RunStatistics {
    /// Record one test result
    pub fn record(&mut self, outcome: TestOutcome) {
        self.executed += 1;
        match outcome {
            TestOutcome::Passed => self.passed += 1,
            TestOutcome::Failed => self.failed += 1,
            TestOutcome::Skipped => self.skipped += 1,
            TestOutcome::NotFound => {}
        }
    }

    /// Fold another set of counters into this one
    pub fn merge(&mut self, other: &RunStatistics) {
        self.executed += other.executed;
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// A named set of artifacts attached to a run by a data collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSet {
    pub display_name: String,
    pub uris: Vec<String>,
}

/// Parallelism directives carried by discovery and run criteria
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelismOptions {
    /// Whether the caller opted into parallel orchestration
    #[serde(default)]
    pub enabled: bool,
    /// Upper bound on concurrent test hosts; processor count when unset
    #[serde(default)]
    pub max_hosts: Option<usize>,
}

impl ParallelismOptions {
    pub fn enabled_with(max_hosts: Option<usize>) -> Self {
        Self {
            enabled: true,
            max_hosts,
        }
    }
}

/// Request describing which sources to discover tests in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryCriteria {
    pub sources: Vec<String>,
    /// Number of found test cases batched into one notification
    pub batch_size: usize,
    /// Opaque filter expression, evaluated by the caller
    pub filter: Option<String>,
    #[serde(default)]
    pub parallelism: ParallelismOptions,
}

impl DiscoveryCriteria {
    pub fn new(sources: Vec<String>) -> Self {
        Self {
            sources,
            batch_size: default_batch_size(),
            filter: None,
            parallelism: ParallelismOptions::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_parallelism(mut self, parallelism: ParallelismOptions) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Split into per-source units for parallel dispatch
    pub fn partition(&self) -> Vec<DiscoveryCriteria> {
        self.sources
            .iter()
            .map(|source| DiscoveryCriteria {
                sources: vec![source.clone()],
                batch_size: self.batch_size,
                filter: self.filter.clone(),
                parallelism: ParallelismOptions::default(),
            })
            .collect()
    }
}

/// What an execution run operates on
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestRunItems {
    /// Run everything discovered in these sources
    Sources { sources: Vec<String> },
    /// Run a pre-selected set of test cases
    Tests { tests: Vec<TestCase> },
}

/// Request describing an execution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCriteria {
    pub items: TestRunItems,
    /// How many fresh results accumulate before a stats-change notification
    pub progress_frequency: usize,
    /// Opaque serialized run configuration, forwarded to the host
    pub run_settings: JsonValue,
    #[serde(default)]
    pub parallelism: ParallelismOptions,
}

impl RunCriteria {
    pub fn for_sources(sources: Vec<String>) -> Self {
        Self {
            items: TestRunItems::Sources { sources },
            progress_frequency: default_progress_frequency(),
            run_settings: JsonValue::Null,
            parallelism: ParallelismOptions::default(),
        }
    }

    pub fn for_tests(tests: Vec<TestCase>) -> Self {
        Self {
            items: TestRunItems::Tests { tests },
            progress_frequency: default_progress_frequency(),
            run_settings: JsonValue::Null,
            parallelism: ParallelismOptions::default(),
        }
    }

    pub fn with_run_settings(mut self, run_settings: JsonValue) -> Self {
        self.run_settings = run_settings;
        self
    }

    pub fn with_parallelism(mut self, parallelism: ParallelismOptions) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Distinct sources covered by this run, in first-seen order
    pub fn sources(&self) -> Vec<String> {
        match &self.items {
            TestRunItems::Sources { sources } => sources.clone(),
            TestRunItems::Tests { tests } => {
                let mut seen = Vec::new();
                for test in tests {
                    if !seen.contains(&test.source) {
                        seen.push(test.source.clone());
                    }
                }
                seen
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.items {
            TestRunItems::Sources { sources } => sources.is_empty(),
            TestRunItems::Tests { tests } => tests.is_empty(),
        }
    }

    /// Split into per-source units for parallel dispatch; pre-selected test
    /// cases are grouped by their source
    pub fn partition(&self) -> Vec<RunCriteria> {
        let unit_items: Vec<TestRunItems> = match &self.items {
            TestRunItems::Sources { sources } => sources
                .iter()
                .map(|source| TestRunItems::Sources {
                    sources: vec![source.clone()],
                })
                .collect(),
            TestRunItems::Tests { tests } => self
                .sources()
                .into_iter()
                .map(|source| TestRunItems::Tests {
                    tests: tests.iter().filter(|t| t.source == source).cloned().collect(),
                })
                .collect(),
        };

        unit_items
            .into_iter()
            .map(|items| RunCriteria {
                items,
                progress_frequency: self.progress_frequency,
                run_settings: self.run_settings.clone(),
                parallelism: ParallelismOptions::default(),
            })
            .collect()
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_progress_frequency() -> usize {
    10
}

/// Terminal payload of one discovery unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryComplete {
    /// Total number of test cases found by this unit
    pub total_count: u64,
    /// Cases found since the last batch notification
    pub last_chunk: Vec<TestCase>,
    pub aborted: bool,
}

impl DiscoveryComplete {
    /// Synthetic payload for a unit that never produced results
    pub fn aborted() -> Self {
        Self {
            total_count: 0,
            last_chunk: Vec::new(),
            aborted: true,
        }
    }

    /// Payload for a rejected request that found nothing
    pub fn empty() -> Self {
        Self {
            total_count: 0,
            last_chunk: Vec::new(),
            aborted: false,
        }
    }
}

/// Terminal payload of one execution unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionComplete {
    pub stats: RunStatistics,
    pub elapsed_ms: u64,
    pub aborted: bool,
    #[serde(default)]
    pub attachments: Vec<AttachmentSet>,
}

impl ExecutionComplete {
    /// Synthetic payload for a unit that never produced results
    pub fn aborted() -> Self {
        Self {
            stats: RunStatistics::default(),
            elapsed_ms: 0,
            aborted: true,
            attachments: Vec::new(),
        }
    }

    /// Payload for a rejected request that ran nothing
    pub fn empty() -> Self {
        Self {
            stats: RunStatistics::default(),
            elapsed_ms: 0,
            aborted: false,
            attachments: Vec::new(),
        }
    }
}

/// Severity of a log message relayed from a host or the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSeverity {
    Informational,
    Warning,
    Error,
}

/// Messages sent from the coordinator to a test host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostRequest {
    /// Protocol version handshake
    CheckVersion { version: u32 },

    /// Load adapter extensions ahead of discovery
    InitializeDiscovery { extension_paths: Vec<String> },

    /// Load adapter extensions ahead of execution
    InitializeExecution { extension_paths: Vec<String> },

    /// Begin discovering tests
    StartDiscovery { criteria: DiscoveryCriteria },

    /// Begin executing tests
    StartExecution { criteria: RunCriteria },

    /// Stop in-flight work and report a terminal event
    Abort,

    /// Shut the host down
    Close,
}

/// Messages sent from a test host to the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// Host is up and its request handler is listening
    Connected { host_id: String, version: u32 },

    /// Response to the version handshake
    VersionAck { version: u32 },

    /// A batch of discovered test cases
    TestCasesFound { test_cases: Vec<TestCase> },

    /// Fresh results plus updated counters
    StatsChange {
        new_results: Vec<TestResult>,
        stats: RunStatistics,
    },

    /// Host log output relayed at a severity
    LogMessage { level: LogSeverity, message: String },

    /// Pass-through protocol payload for diagnostic logging
    RawMessage { payload: String },

    /// Discovery unit finished
    DiscoveryComplete { result: DiscoveryComplete },

    /// Execution unit finished
    ExecutionComplete { result: ExecutionComplete },
}

/// Envelope for all wire communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if the sender speaks our protocol version
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }
}
