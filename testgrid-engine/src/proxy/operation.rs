//! Shared session lifecycle behavior for the proxy managers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tracing::{debug, error, warn};

use testgrid_hosting::{dedup_ordered, ExtensionCache, TestHostProvider};

use crate::channel::SessionChannel;

/// One test host session: the provider that launched it and the channel to it
///
/// Owned exclusively by one proxy manager at a time.
#[derive(Clone)]
pub struct ProxySession {
    pub provider: Arc<dyn TestHostProvider>,
    pub channel: Arc<dyn SessionChannel>,
}

/// Lifecycle state of one session
///
/// `Completed`, `Aborted` and `CommunicationFailed` are terminal; a lost
/// session is never revived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    ChannelPending,
    ChannelReady,
    ExtensionsInitialized,
    Busy,
    Completed,
    Aborted,
    CommunicationFailed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Aborted | SessionState::CommunicationFailed
        )
    }
}

/// Which protocol phase extensions are being initialized for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializeKind {
    Discovery,
    Execution,
}

/// Owns one session's full lifecycle: launch, connect, initialize, close
///
/// Shared base behavior for the discovery and execution proxies. Every
/// failure is reported through the return value or logs; none of the
/// lifecycle methods panic or surface errors to the caller.
pub struct ProxyOperationManager {
    session: ProxySession,
    extension_cache: Arc<ExtensionCache>,
    connection_timeout: Duration,
    state: StdMutex<SessionState>,
    cancelled: AtomicBool,
    extensions_initialized: AtomicBool,
}

impl ProxyOperationManager {
    pub fn new(
        session: ProxySession,
        extension_cache: Arc<ExtensionCache>,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            session,
            extension_cache,
            connection_timeout,
            state: StdMutex::new(SessionState::Created),
            cancelled: AtomicBool::new(false),
            extensions_initialized: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state poisoned")
    }

    pub fn channel(&self) -> &Arc<dyn SessionChannel> {
        &self.session.channel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cache_is_empty(&self) -> bool {
        self.extension_cache.is_empty()
    }

    /// Transition unless the session already reached a terminal state
    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().expect("session state poisoned");
        if state.is_terminal() {
            return;
        }
        *state = next;
    }

    /// Launch the host if needed and block until the peer connects
    ///
    /// Returns `false` on launch failure, connect timeout or handshake
    /// failure; the failure is final for this session.
    pub async fn setup_channel(&self, sources: &[String]) -> bool {
        if self.is_cancelled() {
            debug!("Session aborted before launch; refusing to set up channel");
            return false;
        }

        let state = self.state();
        if matches!(
            state,
            SessionState::ChannelReady | SessionState::ExtensionsInitialized | SessionState::Busy
        ) {
            // A shared session that already connected is reused as-is
            return true;
        }
        if state.is_terminal() {
            return false;
        }

        self.set_state(SessionState::ChannelPending);

        let mut launch_events = self.session.provider.launch_events();
        let start_info = self.session.provider.start_info(sources);

        match self.session.provider.launch(start_info).await {
            Ok(true) => {}
            Ok(false) => {
                error!("Test host launch reported failure");
                self.set_state(SessionState::CommunicationFailed);
                return false;
            }
            Err(e) => {
                error!("Failed to launch test host: {}", e);
                self.set_state(SessionState::CommunicationFailed);
                return false;
            }
        }

        // Advisory readiness signals; the launch result above is authoritative
        while let Ok(event) = launch_events.try_recv() {
            debug!("Test host {} launched (pid {:?})", event.host_id, event.pid);
        }

        if !self
            .session
            .channel
            .wait_for_connection(self.connection_timeout)
            .await
        {
            error!(
                "Test host did not connect within {:?}",
                self.connection_timeout
            );
            self.set_state(SessionState::CommunicationFailed);
            return false;
        }

        if let Err(e) = self.session.channel.initialize_communication().await {
            error!("Test host handshake failed: {}", e);
            self.set_state(SessionState::CommunicationFailed);
            return false;
        }

        self.set_state(SessionState::ChannelReady);
        true
    }

    /// Send the merged extension set to the host, once per session
    ///
    /// The set is the provider's platform-specific extensions unioned with
    /// the cache snapshot, first-seen order, case-insensitive distinct. The
    /// wire call is skipped when the set is empty. Failures degrade the
    /// session rather than fail it.
    pub async fn initialize_extensions(&self, kind: InitializeKind, sources: &[String]) {
        if self.extensions_initialized.swap(true, Ordering::SeqCst) {
            return;
        }

        let cached = self.extension_cache.snapshot();
        let provider_extensions = self.session.provider.extensions(sources, &cached);
        let paths = dedup_ordered(provider_extensions.into_iter().chain(cached));

        if paths.is_empty() {
            debug!("No adapter extensions to initialize");
            self.set_state(SessionState::ExtensionsInitialized);
            return;
        }

        let result = match kind {
            InitializeKind::Discovery => self.session.channel.initialize_discovery(&paths).await,
            InitializeKind::Execution => self.session.channel.initialize_execution(&paths).await,
        };

        if let Err(e) = result {
            warn!("Extension initialization failed, continuing without: {}", e);
        }

        self.set_state(SessionState::ExtensionsInitialized);
    }

    pub fn mark_busy(&self) {
        self.set_state(SessionState::Busy);
    }

    /// Record the outcome of one dispatched unit
    ///
    /// A reusable (shared) session returns to `ChannelReady` after a clean
    /// unit so the next batch can be dispatched over the same channel.
    pub fn finish_unit(&self, aborted: bool, reusable: bool) {
        if aborted {
            self.set_state(SessionState::Aborted);
        } else if reusable {
            self.set_state(SessionState::ChannelReady);
        } else {
            self.set_state(SessionState::Completed);
        }
    }

    pub fn mark_communication_failed(&self) {
        self.set_state(SessionState::CommunicationFailed);
    }

    /// Close the channel and, for non-shared hosts, request termination
    pub async fn close(&self) {
        self.session.channel.close().await;
        if !self.session.provider.is_shared() {
            self.session.provider.terminate().await;
        }
    }

    /// Cancel this session; a pending launch will never happen
    pub async fn abort(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.session.channel.abort().await;
        self.set_state(SessionState::Aborted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockHostProvider, MockSessionChannel};

    fn manager_with(provider: MockHostProvider, channel: MockSessionChannel) -> ProxyOperationManager {
        let session = ProxySession {
            provider: Arc::new(provider),
            channel: Arc::new(channel),
        };
        ProxyOperationManager::new(
            session,
            Arc::new(ExtensionCache::new()),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_setup_channel_happy_path() {
        let provider = MockHostProvider::new();
        let channel = MockSessionChannel::new();
        let calls = channel.calls();
        let manager = manager_with(provider, channel);

        assert_eq!(manager.state(), SessionState::Created);
        assert!(manager.setup_channel(&["a.dll".to_string()]).await);
        assert_eq!(manager.state(), SessionState::ChannelReady);

        let recorded = calls.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![
                "wait_for_connection".to_string(),
                "initialize_communication".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_setup_channel_launch_failure() {
        let provider = MockHostProvider::new().with_launch_result(Ok(false));
        let channel = MockSessionChannel::new();
        let calls = channel.calls();
        let manager = manager_with(provider, channel);

        assert!(!manager.setup_channel(&[]).await);
        assert_eq!(manager.state(), SessionState::CommunicationFailed);
        // The channel was never touched
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_setup_channel_connect_failure() {
        let provider = MockHostProvider::new();
        let channel = MockSessionChannel::new().with_connect_result(false);
        let manager = manager_with(provider, channel);

        assert!(!manager.setup_channel(&[]).await);
        assert_eq!(manager.state(), SessionState::CommunicationFailed);
    }

    #[tokio::test]
    async fn test_abort_prevents_launch() {
        let provider = MockHostProvider::new();
        let launch_calls = provider.launch_calls();
        let manager = manager_with(provider, MockSessionChannel::new());

        manager.abort().await;
        assert!(!manager.setup_channel(&[]).await);
        assert_eq!(launch_calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.state(), SessionState::Aborted);
    }

    #[tokio::test]
    async fn test_terminal_state_is_sticky() {
        let provider = MockHostProvider::new().with_launch_result(Ok(false));
        let manager = manager_with(provider, MockSessionChannel::new());

        assert!(!manager.setup_channel(&[]).await);
        manager.mark_busy();
        assert_eq!(manager.state(), SessionState::CommunicationFailed);
        // A failed session is never set up again
        assert!(!manager.setup_channel(&[]).await);
    }

    #[tokio::test]
    async fn test_extensions_skip_wire_call_when_set_empty() {
        let provider = MockHostProvider::new();
        let channel = MockSessionChannel::new();
        let calls = channel.calls();
        let manager = manager_with(provider, channel);

        assert!(manager.setup_channel(&[]).await);
        manager
            .initialize_extensions(InitializeKind::Discovery, &[])
            .await;

        let recorded = calls.lock().unwrap().clone();
        assert!(!recorded.iter().any(|c| c.starts_with("initialize_discovery")));
        assert_eq!(manager.state(), SessionState::ExtensionsInitialized);
    }

    #[tokio::test]
    async fn test_extensions_sent_once_with_ordered_dedup() {
        let provider = MockHostProvider::new();
        let channel = MockSessionChannel::new();
        let calls = channel.calls();
        let session = ProxySession {
            provider: Arc::new(provider),
            channel: Arc::new(channel),
        };
        let cache = Arc::new(ExtensionCache::with_paths(vec![
            "e1.dll".to_string(),
            "E1.DLL".to_string(),
            "e2.dll".to_string(),
        ]));
        let manager = ProxyOperationManager::new(session, cache, Duration::from_secs(1));

        assert!(manager.setup_channel(&[]).await);
        manager
            .initialize_extensions(InitializeKind::Discovery, &[])
            .await;
        // Second call is a no-op
        manager
            .initialize_extensions(InitializeKind::Discovery, &[])
            .await;

        let recorded = calls.lock().unwrap().clone();
        let init_calls: Vec<_> = recorded
            .iter()
            .filter(|c| c.starts_with("initialize_discovery"))
            .collect();
        assert_eq!(init_calls.len(), 1);
        assert_eq!(init_calls[0], "initialize_discovery [e1.dll, e2.dll]");
    }

    #[tokio::test]
    async fn test_close_terminates_non_shared_host() {
        let provider = MockHostProvider::new();
        let terminate_calls = provider.terminate_calls();
        let manager = manager_with(provider, MockSessionChannel::new());

        manager.close().await;
        assert_eq!(terminate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_keeps_shared_host_alive() {
        let provider = MockHostProvider::new().shared();
        let terminate_calls = provider.terminate_calls();
        let manager = manager_with(provider, MockSessionChannel::new());

        manager.close().await;
        assert_eq!(terminate_calls.load(Ordering::SeqCst), 0);
    }
}
