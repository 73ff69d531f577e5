//! Parallel discovery orchestration

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use testgrid_hosting::ExtensionCache;
use testgrid_ipc::{
    DiscoveryComplete, DiscoveryCriteria, LogSeverity, RunStatistics, TestCase, TestResult,
};

use crate::events::TestSessionEvents;
use crate::factory::SessionFactory;
use crate::parallel::pool_size;
use crate::proxy::discovery::{ProxyDiscoveryManager, TestDiscoveryManager};

/// Fans one discovery request out across a bounded pool of host sessions
///
/// Each pool slot drains the pending unit queue: a faster host simply picks
/// up more units. Per-unit terminals are folded into one aggregate, emitted
/// exactly once after every dispatched unit has finished.
pub struct ParallelDiscoveryManager {
    sessions: Arc<dyn SessionFactory>,
    extension_cache: Arc<ExtensionCache>,
    connection_timeout: Duration,
    default_max_hosts: Option<usize>,
    cancelled: AtomicBool,
    delegate: StdMutex<Option<Arc<ProxyDiscoveryManager>>>,
    active_run: StdMutex<Option<Arc<DiscoveryRunState>>>,
}

/// Queue and aggregate shared by the slot tasks of one run
struct DiscoveryRunState {
    inner: StdMutex<DiscoveryRunInner>,
}

struct DiscoveryRunInner {
    pending: VecDeque<DiscoveryCriteria>,
    active: HashMap<usize, Arc<ProxyDiscoveryManager>>,
    total_count: u64,
    last_chunk: Vec<TestCase>,
    aborted: bool,
    cancelled: bool,
}

impl ParallelDiscoveryManager {
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

    fn new_proxy(&self, reusable: bool) -> Arc<ProxyDiscoveryManager> {
        let session = self.sessions.create_session();
        if reusable {
            Arc::new(ProxyDiscoveryManager::new_reusable(
                session,
                self.extension_cache.clone(),
                self.connection_timeout,
            ))
        } else {
            Arc::new(ProxyDiscoveryManager::new(
                session,
                self.extension_cache.clone(),
                self.connection_timeout,
            ))
        }
    }
}

#[async_trait]
impl TestDiscoveryManager for ParallelDiscoveryManager {
    async fn discover_tests(
        &self,
        criteria: &DiscoveryCriteria,
        events: Arc<dyn TestSessionEvents>,
    ) {
        let units = criteria.partition();

        // Pooling only pays off with at least two units
        if units.len() <= 1 {
            let manager = self.new_proxy(false);
            *self.delegate.lock().expect("delegate slot poisoned") = Some(manager.clone());
            if self.cancelled.load(Ordering::SeqCst) {
                manager.abort().await;
            }
            let unit = units.into_iter().next().unwrap_or_else(|| criteria.clone());
            manager.discover_tests(&unit, events).await;
            *self.delegate.lock().expect("delegate slot poisoned") = None;
            return;
        }

        let shared = self.sessions.is_shared();
        let requested = criteria.parallelism.max_hosts.or(self.default_max_hosts);
        let pool = pool_size(requested, units.len());
        info!(
            "Parallel discovery: {} units across {} test hosts (shared: {})",
            units.len(),
            pool,
            shared
        );

        let run = Arc::new(DiscoveryRunState {
            inner: StdMutex::new(DiscoveryRunInner {
                pending: units.into(),
                active: HashMap::new(),
                total_count: 0,
                last_chunk: Vec::new(),
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
            DiscoveryComplete {
                total_count: inner.total_count,
                last_chunk: std::mem::take(&mut inner.last_chunk),
                aborted: inner.aborted || inner.cancelled,
            }
        };
        *self.active_run.lock().expect("run slot poisoned") = None;
        events.on_discovery_complete(&result);
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
    mut manager: Arc<ProxyDiscoveryManager>,
    shared: bool,
    run: Arc<DiscoveryRunState>,
    sessions: Arc<dyn SessionFactory>,
    cache: Arc<ExtensionCache>,
    timeout: Duration,
    caller: Arc<dyn TestSessionEvents>,
) {
    let mut used = false;
    let mut contribution: Option<DiscoveryComplete> = None;

    loop {
        // Merging the previous unit, claiming the next and registering the
        // manager that will run it is one atomic step; an abort either
        // cancels before the claim or sees the registered manager
        let unit = {
            let mut inner = run.inner.lock().expect("run state poisoned");
            if let Some(result) = contribution.take() {
                inner.total_count += result.total_count;
                inner.last_chunk.extend(result.last_chunk);
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
                            manager = Arc::new(ProxyDiscoveryManager::new(
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

        debug!("Slot {} dispatching discovery unit {:?}", slot, unit.sources);
        let unit_events = Arc::new(UnitDiscoveryEvents {
            caller: caller.clone(),
            terminal: StdMutex::new(None),
        });
        manager.discover_tests(&unit, unit_events.clone()).await;
        contribution = unit_events.take();
    }

    if shared && used {
        manager.close().await;
    }
}

/// Forwards streamed events to the caller, holds back the unit terminal
struct UnitDiscoveryEvents {
    caller: Arc<dyn TestSessionEvents>,
    terminal: StdMutex<Option<DiscoveryComplete>>,
}

impl UnitDiscoveryEvents {
    fn take(&self) -> Option<DiscoveryComplete> {
        self.terminal.lock().expect("terminal slot poisoned").take()
    }
}

impl TestSessionEvents for UnitDiscoveryEvents {
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
        *self.terminal.lock().expect("terminal slot poisoned") = Some(result.clone());
    }
}
