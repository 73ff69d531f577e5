//! Hand-written test doubles shared by the engine unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};

use testgrid_hosting::{HostLaunchedEvent, HostStartInfo, HostingError, TestHostProvider};
use testgrid_ipc::{
    DiscoveryComplete, DiscoveryCriteria, ExecutionComplete, IpcError, LogSeverity, RunCriteria,
    RunStatistics, TestCase, TestResult,
};

use crate::channel::SessionChannel;
use crate::events::TestSessionEvents;
use crate::factory::SessionFactory;
use crate::proxy::operation::ProxySession;

/// Tracks how many sessions are connected at once
#[derive(Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    high_water: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

/// Scriptable host provider
pub struct MockHostProvider {
    launch_result: Result<bool, String>,
    shared: bool,
    emit_launch_event: bool,
    launch_calls: Arc<AtomicUsize>,
    terminate_calls: Arc<AtomicUsize>,
    launched_tx: broadcast::Sender<HostLaunchedEvent>,
}

impl MockHostProvider {
    pub fn new() -> Self {
        let (launched_tx, _) = broadcast::channel(8);
        Self {
            launch_result: Ok(true),
            shared: false,
            emit_launch_event: false,
            launch_calls: Arc::new(AtomicUsize::new(0)),
            terminate_calls: Arc::new(AtomicUsize::new(0)),
            launched_tx,
        }
    }

    pub fn with_launch_result(mut self, result: Result<bool, String>) -> Self {
        self.launch_result = result;
        self
    }

    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    /// Raise the advisory launched event even when the launch then fails
    pub fn emitting_launch_event(mut self) -> Self {
        self.emit_launch_event = true;
        self
    }

    pub fn launch_calls(&self) -> Arc<AtomicUsize> {
        self.launch_calls.clone()
    }

    pub fn terminate_calls(&self) -> Arc<AtomicUsize> {
        self.terminate_calls.clone()
    }
}

#[async_trait]
impl TestHostProvider for MockHostProvider {
    fn start_info(&self, sources: &[String]) -> HostStartInfo {
        HostStartInfo::new("mock-host").with_args(sources.to_vec())
    }

    async fn launch(&self, _start_info: HostStartInfo) -> Result<bool, HostingError> {
        self.launch_calls.fetch_add(1, Ordering::SeqCst);
        if self.emit_launch_event {
            let _ = self.launched_tx.send(HostLaunchedEvent {
                host_id: "mock-host".to_string(),
                pid: Some(4242),
            });
        }
        match &self.launch_result {
            Ok(resolved) => Ok(*resolved),
            Err(message) => Err(HostingError::SpawnError(message.clone())),
        }
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn extensions(&self, _sources: &[String], additional: &[String]) -> Vec<String> {
        additional.to_vec()
    }

    fn launch_events(&self) -> broadcast::Receiver<HostLaunchedEvent> {
        self.launched_tx.subscribe()
    }

    async fn terminate(&self) {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scriptable session channel
///
/// Records every call; run outcomes are popped from scripted queues, with a
/// clean empty completion when nothing is scripted.
pub struct MockSessionChannel {
    connect_result: bool,
    run_delay: Option<Duration>,
    block_until_abort: bool,
    abort_notify: Notify,
    calls: Arc<StdMutex<Vec<String>>>,
    discovery_batches: StdMutex<VecDeque<Vec<TestCase>>>,
    discovery_outcomes: StdMutex<VecDeque<Result<DiscoveryComplete, IpcError>>>,
    execution_batches: StdMutex<VecDeque<(Vec<TestResult>, RunStatistics)>>,
    execution_outcomes: StdMutex<VecDeque<Result<ExecutionComplete, IpcError>>>,
    gauge: Option<Arc<ConcurrencyGauge>>,
    connected: AtomicBool,
}

impl MockSessionChannel {
    pub fn new() -> Self {
        Self {
            connect_result: true,
            run_delay: None,
            block_until_abort: false,
            abort_notify: Notify::new(),
            calls: Arc::new(StdMutex::new(Vec::new())),
            discovery_batches: StdMutex::new(VecDeque::new()),
            discovery_outcomes: StdMutex::new(VecDeque::new()),
            execution_batches: StdMutex::new(VecDeque::new()),
            execution_outcomes: StdMutex::new(VecDeque::new()),
            gauge: None,
            connected: AtomicBool::new(false),
        }
    }

    pub fn with_connect_result(mut self, connect_result: bool) -> Self {
        self.connect_result = connect_result;
        self
    }

    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = Some(delay);
        self
    }

    /// Make runs park until the channel is aborted
    pub fn blocking_until_abort(mut self) -> Self {
        self.block_until_abort = true;
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn push_discovery_outcome(self, outcome: Result<DiscoveryComplete, IpcError>) -> Self {
        self.discovery_outcomes.lock().unwrap().push_back(outcome);
        self
    }

    pub fn push_discovery_batch(self, batch: Vec<TestCase>) -> Self {
        self.discovery_batches.lock().unwrap().push_back(batch);
        self
    }

    pub fn push_execution_outcome(self, outcome: Result<ExecutionComplete, IpcError>) -> Self {
        self.execution_outcomes.lock().unwrap().push_back(outcome);
        self
    }

    pub fn push_execution_batch(self, results: Vec<TestResult>, stats: RunStatistics) -> Self {
        self.execution_batches
            .lock()
            .unwrap()
            .push_back((results, stats));
        self
    }

    pub fn calls(&self) -> Arc<StdMutex<Vec<String>>> {
        self.calls.clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    async fn run_preamble(&self) {
        if let Some(delay) = self.run_delay {
            tokio::time::sleep(delay).await;
        }
        if self.block_until_abort {
            self.abort_notify.notified().await;
        }
    }
}

#[async_trait]
impl SessionChannel for MockSessionChannel {
    async fn wait_for_connection(&self, _timeout: Duration) -> bool {
        self.record("wait_for_connection");
        if self.connect_result {
            if let Some(gauge) = &self.gauge {
                if !self.connected.swap(true, Ordering::SeqCst) {
                    gauge.enter();
                }
            }
        }
        self.connect_result
    }

    async fn initialize_communication(&self) -> Result<(), IpcError> {
        self.record("initialize_communication");
        Ok(())
    }

    async fn initialize_discovery(&self, extension_paths: &[String]) -> Result<(), IpcError> {
        self.record(format!(
            "initialize_discovery [{}]",
            extension_paths.join(", ")
        ));
        Ok(())
    }

    async fn initialize_execution(&self, extension_paths: &[String]) -> Result<(), IpcError> {
        self.record(format!(
            "initialize_execution [{}]",
            extension_paths.join(", ")
        ));
        Ok(())
    }

    async fn run_discovery(
        &self,
        _criteria: &DiscoveryCriteria,
        events: &dyn TestSessionEvents,
    ) -> Result<DiscoveryComplete, IpcError> {
        self.record("run_discovery");
        self.run_preamble().await;

        let batch = self.discovery_batches.lock().unwrap().pop_front();
        if let Some(batch) = batch {
            events.on_test_cases_found(&batch);
        }

        let outcome = self.discovery_outcomes.lock().unwrap().pop_front();
        outcome.unwrap_or_else(|| Ok(DiscoveryComplete::empty()))
    }

    async fn run_execution(
        &self,
        _criteria: &RunCriteria,
        events: &dyn TestSessionEvents,
    ) -> Result<ExecutionComplete, IpcError> {
        self.record("run_execution");
        self.run_preamble().await;

        let batch = self.execution_batches.lock().unwrap().pop_front();
        if let Some((results, stats)) = batch {
            events.on_stats_change(&results, &stats);
        }

        let outcome = self.execution_outcomes.lock().unwrap().pop_front();
        outcome.unwrap_or_else(|| Ok(ExecutionComplete::empty()))
    }

    async fn abort(&self) {
        self.record("abort");
        self.abort_notify.notify_one();
    }

    async fn close(&self) {
        self.record("close");
        if let Some(gauge) = &self.gauge {
            if self.connected.swap(false, Ordering::SeqCst) {
                gauge.exit();
            }
        }
    }
}

/// Event sink that records everything it is told
#[derive(Default)]
pub struct RecordingEvents {
    test_cases: StdMutex<Vec<TestCase>>,
    logs: StdMutex<Vec<(LogSeverity, String)>>,
    raw_messages: StdMutex<Vec<String>>,
    stats_changes: StdMutex<Vec<RunStatistics>>,
    discovery_terminals: StdMutex<Vec<DiscoveryComplete>>,
    execution_terminals: StdMutex<Vec<ExecutionComplete>>,
}

impl RecordingEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn found_test_cases(&self) -> Vec<TestCase> {
        self.test_cases.lock().unwrap().clone()
    }

    pub fn logs(&self) -> Vec<(LogSeverity, String)> {
        self.logs.lock().unwrap().clone()
    }

    pub fn error_log_count(&self) -> usize {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, _)| *level == LogSeverity::Error)
            .count()
    }

    pub fn raw_messages(&self) -> Vec<String> {
        self.raw_messages.lock().unwrap().clone()
    }

    pub fn stats_changes(&self) -> Vec<RunStatistics> {
        self.stats_changes.lock().unwrap().clone()
    }

    pub fn discovery_terminals(&self) -> Vec<DiscoveryComplete> {
        self.discovery_terminals.lock().unwrap().clone()
    }

    pub fn execution_terminals(&self) -> Vec<ExecutionComplete> {
        self.execution_terminals.lock().unwrap().clone()
    }
}

impl TestSessionEvents for RecordingEvents {
    fn on_test_cases_found(&self, test_cases: &[TestCase]) {
        self.test_cases.lock().unwrap().extend_from_slice(test_cases);
    }

    fn on_stats_change(&self, _new_results: &[TestResult], stats: &RunStatistics) {
        self.stats_changes.lock().unwrap().push(stats.clone());
    }

    fn on_raw_message(&self, payload: &str) {
        self.raw_messages.lock().unwrap().push(payload.to_string());
    }

    fn on_log_message(&self, level: LogSeverity, message: &str) {
        self.logs.lock().unwrap().push((level, message.to_string()));
    }

    fn on_discovery_complete(&self, result: &DiscoveryComplete) {
        self.discovery_terminals.lock().unwrap().push(result.clone());
    }

    fn on_execution_complete(&self, result: &ExecutionComplete) {
        self.execution_terminals.lock().unwrap().push(result.clone());
    }
}

type ChannelBuilder = dyn Fn(usize) -> MockSessionChannel + Send + Sync;

/// Session factory over mock providers and scripted channels
pub struct MockSessionFactory {
    shared: bool,
    created: AtomicUsize,
    gauge: Arc<ConcurrencyGauge>,
    channel_builder: Box<ChannelBuilder>,
}

impl MockSessionFactory {
    pub fn new(
        shared: bool,
        channel_builder: impl Fn(usize) -> MockSessionChannel + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            shared,
            created: AtomicUsize::new(0),
            gauge: Arc::new(ConcurrencyGauge::default()),
            channel_builder: Box::new(channel_builder),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn gauge(&self) -> Arc<ConcurrencyGauge> {
        self.gauge.clone()
    }
}

impl SessionFactory for MockSessionFactory {
    fn create_session(&self) -> ProxySession {
        let index = self.created.fetch_add(1, Ordering::SeqCst);
        let provider = if self.shared {
            MockHostProvider::new().shared()
        } else {
            MockHostProvider::new()
        };
        let channel = (self.channel_builder)(index).with_gauge(self.gauge.clone());
        ProxySession {
            provider: Arc::new(provider),
            channel: Arc::new(channel),
        }
    }

    fn is_shared(&self) -> bool {
        self.shared
    }
}

/// Shorthand for a test case in tests
pub fn test_case(name: &str, source: &str) -> TestCase {
    TestCase::new(name, source, "executor://mock")
}
