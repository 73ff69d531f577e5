//! Parallel execution orchestration

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use testgrid_hosting::ExtensionCache;
use testgrid_ipc::{
    AttachmentSet, DiscoveryComplete, ExecutionComplete, LogSeverity, RunCriteria, RunStatistics,
    TestCase, TestResult,
};

use crate::events::TestSessionEvents;
use crate::factory::SessionFactory;
use crate::parallel::pool_size;
use crate::proxy::execution::{ProxyExecutionManager, TestExecutionManager};

/// Fans one execution request out across a bounded pool of host sessions
///
/// The scheduling policy mirrors parallel discovery: slots drain a shared
/// pending queue, per-unit terminals fold into one aggregate with combined
/// statistics and the longest unit's elapsed time.
pub struct ParallelExecutionManager {
    sessions: Arc<dyn SessionFactory>,
    extension_cache: Arc<ExtensionCache>,
    connection_timeout: Duration,
    default_max_hosts: Option<usize>,
    cancelled: AtomicBool,
    delegate: StdMutex<Option<Arc<ProxyExecutionManager>>>,
    active_run: StdMutex<Option<Arc<ExecutionRunState>>>,
}

struct ExecutionRunState {
    inner: StdMutex<ExecutionRunInner>,
}

struct ExecutionRunInner {
    pending: VecDeque<RunCriteria>,
    active: HashMap<usize, Arc<ProxyExecutionManager>>,
    stats: RunStatistics,
    elapsed_ms: u64,
    attachments: Vec<AttachmentSet>,
    aborted: bool,
    cancelled: bool,
}

impl ParallelExecutionManager {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        extension_cache: Arc<ExtensionCache>,
        connection_timeout: Duration,
        default_max_hosts: Option<usize>,
    ) -> Self {
        Self {
            sessions,
            extension_cache,
            connection_timeout,
            default_max_hosts,
            cancelled: AtomicBool::new(false),
            delegate: StdMutex::new(None),
            active_run: StdMutex::new(None),
        }
    }

    fn new_proxy(&self, reusable: bool) -> Arc<ProxyExecutionManager> {
        let session = self.sessions.create_session();
        if reusable {
            Arc::new(ProxyExecutionManager::new_reusable(
                session,
                self.extension_cache.clone(),
                self.connection_timeout,
            ))
        } else {
            Arc::new(ProxyExecutionManager::new(
                session,
                self.extension_cache.clone(),
                self.connection_timeout,
            ))
        }
    }
}

#[async_trait]
impl TestExecutionManager for ParallelExecutionManager {
    async fn run_tests(&self, criteria: &RunCriteria, events: Arc<dyn TestSessionEvents>) {
        let units = criteria.partition();

        // Pooling only pays off with at least two units
        if units.len() <= 1 {
            let manager = self.new_proxy(false);
            *self.delegate.lock().expect("delegate slot poisoned") = Some(manager.clone());
            if self.cancelled.load(Ordering::SeqCst) {
                manager.abort().await;
            }
            let unit = units.into_iter().next().unwrap_or_else(|| criteria.clone());
            manager.run_tests(&unit, events).await;
            *self.delegate.lock().expect("delegate slot poisoned") = None;
            return;
        }

        let shared = self.sessions.is_shared();
        let requested = criteria.parallelism.max_hosts.or(self.default_max_hosts);
        let pool = pool_size(requested, units.len());
        info!(
            "Parallel execution: {} units across {} test hosts (shared: {})",
            units.len(),
            pool,
            shared
        );

        let run = Arc::new(ExecutionRunState {
            inner: StdMutex::new(ExecutionRunInner {
                pending: units.into(),
                active: HashMap::new(),
                stats: RunStatistics::default(),
                elapsed_ms: 0,
                attachments: Vec::new(),
                aborted: false,
                cancelled: self.cancelled.load(Ordering::SeqCst),
            }),
        });
        *self.active_run.lock().expect("run slot poisoned") = Some(run.clone());

        let mut handles = Vec::with_capacity(pool);
        for slot in 0..pool {
            // First-wave managers are constructed eagerly, one per slot
            let initial = self.new_proxy(shared);
            let run = run.clone();
            let sessions = self.sessions.clone();
            let cache = self.extension_cache.clone();
            let timeout = self.connection_timeout;
            let caller = events.clone();
            handles.push(tokio::spawn(async move {
                run_slot(slot, initial, shared, run, sessions, cache, timeout, caller).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        let result = {
            let mut inner = run.inner.lock().expect("run state poisoned");
            ExecutionComplete {
                stats: inner.stats.clone(),
                elapsed_ms: inner.elapsed_ms,
                aborted: inner.aborted || inner.cancelled,
                attachments: std::mem::take(&mut inner.attachments),
            }
        };
        *self.active_run.lock().expect("run slot poisoned") = None;
        events.on_execution_complete(&result);
    }

    async fn abort(&self) {
        self.cancelled.store(true, Ordering::SeqCst);

        let delegate = self.delegate.lock().expect("delegate slot poisoned").clone();
        if let Some(manager) = delegate {
            manager.abort().await;
        }

        let run = self.active_run.lock().expect("run slot poisoned").clone();
        if let Some(run) = run {
            let active: Vec<_> = {
                let mut inner = run.inner.lock().expect("run state poisoned");
                inner.cancelled = true;
                inner.pending.clear();
                inner.active.values().cloned().collect()
            };
            for manager in active {
                manager.abort().await;
            }
        }
    }

    async fn close(&self) {
        let delegate = self.delegate.lock().expect("delegate slot poisoned").clone();
        if let Some(manager) = delegate {
            manager.close().await;
        }

        let run = self.active_run.lock().expect("run slot poisoned").clone();
        if let Some(run) = run {
            let active: Vec<_> = {
                let inner = run.inner.lock().expect("run state poisoned");
                inner.active.values().cloned().collect()
            };
            for manager in active {
                manager.close().await;
            }
        }
    }
}

/// One pool slot: drain units until the queue is dry or the run cancelled
#[allow(clippy::too_many_arguments)]
async fn run_slot(
    slot: usize,
    mut manager: Arc<ProxyExecutionManager>,
    shared: bool,
    run: Arc<ExecutionRunState>,
    sessions: Arc<dyn SessionFactory>,
    cache: Arc<ExtensionCache>,
    timeout: Duration,
    caller: Arc<dyn TestSessionEvents>,
) {
    let mut used = false;
    let mut contribution: Option<ExecutionComplete> = None;

    loop {
        // Merging the previous unit, claiming the next and registering the
        // manager that will run it is one atomic step
        let unit = {
            let mut inner = run.inner.lock().expect("run state poisoned");
            if let Some(result) = contribution.take() {
                inner.stats.merge(&result.stats);
                inner.elapsed_ms = inner.elapsed_ms.max(result.elapsed_ms);
                inner.attachments.extend(result.attachments);
                inner.aborted |= result.aborted;
            }
            inner.active.remove(&slot);
            if inner.cancelled {
                None
            } else {
                match inner.pending.pop_front() {
                    Some(unit) => {
                        if used && !shared {
                            // Non-shared hosts are single-use; mint a fresh session
                            manager = Arc::new(ProxyExecutionManager::new(
                                sessions.create_session(),
                                cache.clone(),
                                timeout,
                            ));
                        }
                        used = true;
                        inner.active.insert(slot, manager.clone());
                        Some(unit)
                    }
                    None => None,
                }
            }
        };
        let Some(unit) = unit else { break };

        debug!("Slot {} dispatching execution unit {:?}", slot, unit.sources());
        let unit_events = Arc::new(UnitExecutionEvents {
            caller: caller.clone(),
            terminal: StdMutex::new(None),
        });
        manager.run_tests(&unit, unit_events.clone()).await;
        contribution = unit_events.take();
    }

    if shared && used {
        manager.close().await;
    }
}

/// Forwards streamed events to the caller, holds back the unit terminal
struct UnitExecutionEvents {
    caller: Arc<dyn TestSessionEvents>,
    terminal: StdMutex<Option<ExecutionComplete>>,
}

impl UnitExecutionEvents {
    fn take(&self) -> Option<ExecutionComplete> {
        self.terminal.lock().expect("terminal slot poisoned").take()
    }
}

impl TestSessionEvents for UnitExecutionEvents {
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
