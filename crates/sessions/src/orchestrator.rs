//! Session orchestration.
//!
//! State machine per session: `uninitialized → pairing → connected ⇄
//! disconnected`, with teardown as the absorbing removal. Transitions are
//! driven only by connection events or explicit teardown; reconnects are
//! serialized through the stored status so a stale attempt never races a
//! fresh connection.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, RwLock},
    time::Duration,
};

use {
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use tether_store::json;

use crate::{
    client::{ConnectionEvent, DisconnectCause, EventReceiver, MessengerClient, MessengerConnection},
    error::Result,
    index::{SessionRecord, SessionStatus},
};

/// Delay before the single reconnect attempt after an unsolicited close.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Pairing progress surfaced to the actor's chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingUpdate {
    PairingCode(String),
    PairingFailed(String),
    Connected,
    Closed,
}

/// Sender half for pairing progress updates.
pub type PairingSender = mpsc::UnboundedSender<PairingUpdate>;

struct Session {
    record: SessionRecord,
    handle: Option<Arc<dyn MessengerConnection>>,
}

struct Inner {
    client: Arc<dyn MessengerClient>,
    sessions_dir: PathBuf,
    index_path: PathBuf,
    reconnect_delay: Duration,
    sessions: RwLock<HashMap<i64, Session>>,
}

/// Owns the set of per-actor messenger connections and the persisted index.
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    /// Load the persisted index. Live handles start empty; call
    /// [`Self::resume_persisted`] to re-open previously connected sessions.
    pub async fn load(
        client: Arc<dyn MessengerClient>,
        sessions_dir: PathBuf,
        index_path: PathBuf,
    ) -> Result<Self> {
        let records: Vec<SessionRecord> = json::load_or_default(&index_path).await?;
        let sessions = records
            .into_iter()
            .map(|record| {
                (record.actor_id, Session {
                    record,
                    handle: None,
                })
            })
            .collect();
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                sessions_dir,
                index_path,
                reconnect_delay: RECONNECT_DELAY,
                sessions: RwLock::new(sessions),
            }),
        })
    }

    /// Override the reconnect delay. Only effective right after `load`, while
    /// this handle is the sole owner.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.reconnect_delay = delay;
        }
        self
    }

    /// Re-attempt `connect` for every persisted session whose last known
    /// status was `connected`.
    pub async fn resume_persisted(&self) {
        let to_resume: Vec<(i64, String)> = {
            let sessions = self.inner.sessions.read().unwrap_or_else(|e| e.into_inner());
            sessions
                .values()
                .filter(|s| s.record.status == SessionStatus::Connected)
                .map(|s| (s.record.actor_id, s.record.number.clone()))
                .collect()
        };
        for (actor_id, number) in to_resume {
            info!(actor_id, number, "resuming persisted session");
            if let Err(e) = self.connect(actor_id, &number, None, None).await {
                warn!(actor_id, error = %e, "failed to resume session");
            }
        }
    }

    /// Open (or re-open) the connection for `actor_id`.
    ///
    /// Allocates the per-actor credential dir, connects through the messenger
    /// client, and pumps lifecycle events into state transitions. Pairing
    /// progress is forwarded through `updates` when provided.
    pub async fn connect(
        &self,
        actor_id: i64,
        number: &str,
        username: Option<String>,
        updates: Option<PairingSender>,
    ) -> Result<()> {
        let credential_dir = self.inner.sessions_dir.join(format!("actor_{actor_id}"));
        tokio::fs::create_dir_all(&credential_dir).await?;

        let registered = self.inner.client.is_registered(&credential_dir);
        debug!(actor_id, number, registered, "opening messenger connection");

        {
            let mut sessions = self.inner.sessions.write().unwrap_or_else(|e| e.into_inner());
            let session = sessions.entry(actor_id).or_insert_with(|| Session {
                record: SessionRecord {
                    actor_id,
                    number: number.to_string(),
                    status: SessionStatus::Uninitialized,
                    credential_dir: credential_dir.clone(),
                    username: None,
                },
                handle: None,
            });
            session.record.number = number.to_string();
            session.record.status = SessionStatus::Pairing;
            session.record.credential_dir = credential_dir.clone();
            if username.is_some() {
                session.record.username = username;
            }
        }
        self.persist().await;

        let (handle, events) = match self.inner.client.connect(&credential_dir).await {
            Ok(pair) => pair,
            Err(e) => {
                self.transition(actor_id, SessionStatus::Disconnected, true).await;
                return Err(e);
            },
        };

        {
            let mut sessions = self.inner.sessions.write().unwrap_or_else(|e| e.into_inner());
            if let Some(session) = sessions.get_mut(&actor_id) {
                session.handle = Some(Arc::clone(&handle));
            }
        }

        let this = self.clone();
        let number = number.to_string();
        tokio::spawn(async move {
            this.pump_events(actor_id, number, handle, events, updates).await;
        });

        Ok(())
    }

    // Returns a boxed `Send` future rather than an `async fn` to break the
    // auto-trait inference cycle between `connect` (which spawns this) and
    // `on_closed` (which this awaits, and which spawns `connect` again).
    fn pump_events(
        self,
        actor_id: i64,
        number: String,
        handle: Arc<dyn MessengerConnection>,
        mut events: EventReceiver,
        updates: Option<PairingSender>,
    ) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
        // Exactly one pairing request per connection attempt, no matter how
        // often the client re-signals readiness.
        let mut pairing_requested = false;

        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::PairingRequired => {
                    if pairing_requested {
                        debug!(actor_id, "duplicate pairing-required event ignored");
                        continue;
                    }
                    pairing_requested = true;
                    match handle.request_pairing_code(&number).await {
                        Ok(code) => {
                            info!(actor_id, "pairing code issued");
                            notify(&updates, PairingUpdate::PairingCode(code));
                        },
                        Err(e) => {
                            warn!(actor_id, error = %e, "pairing code request failed");
                            notify(&updates, PairingUpdate::PairingFailed(e.to_string()));
                        },
                    }
                },
                ConnectionEvent::Open => {
                    info!(actor_id, number, "session connected");
                    self.transition(actor_id, SessionStatus::Connected, false).await;
                    notify(&updates, PairingUpdate::Connected);
                },
                ConnectionEvent::Closed(cause) => {
                    self.on_closed(actor_id, &number, &cause).await;
                    notify(&updates, PairingUpdate::Closed);
                    break;
                },
            }
        }
        })
    }

    async fn on_closed(&self, actor_id: i64, number: &str, cause: &DisconnectCause) {
        self.transition(actor_id, SessionStatus::Disconnected, true).await;

        if cause.is_logged_out() {
            // Credentials are no longer valid; reconnecting would loop
            // forever on a dead session.
            info!(actor_id, "session logged out, not reconnecting");
            return;
        }

        warn!(actor_id, ?cause, "session closed, scheduling reconnect");
        let this = self.clone();
        let number = number.to_string();
        let delay = self.inner.reconnect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // The session may have been torn down or reconnected by the
            // actor in the meantime; a stale attempt must no-op.
            let eligible = {
                let sessions = this.inner.sessions.read().unwrap_or_else(|e| e.into_inner());
                sessions
                    .get(&actor_id)
                    .is_some_and(|s| s.record.status == SessionStatus::Disconnected)
            };
            if !eligible {
                debug!(actor_id, "reconnect attempt is stale, skipping");
                return;
            }
            if let Err(e) = this.connect(actor_id, &number, None, None).await {
                warn!(actor_id, error = %e, "reconnect attempt failed");
            }
        });
    }

    /// Live handle for `actor_id`, only while the session is connected.
    ///
    /// Operators with no live session of their own borrow an arbitrary other
    /// live connection — a deliberate privilege rule so operators are never
    /// blocked by lacking a personal session.
    pub fn connection_for(
        &self,
        actor_id: i64,
        is_operator: bool,
    ) -> Option<Arc<dyn MessengerConnection>> {
        let sessions = self.inner.sessions.read().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get(&actor_id)
            && session.record.status == SessionStatus::Connected
            && let Some(handle) = &session.handle
        {
            return Some(Arc::clone(handle));
        }

        if is_operator {
            for session in sessions.values() {
                if session.record.status == SessionStatus::Connected
                    && let Some(handle) = &session.handle
                {
                    info!(
                        operator_id = actor_id,
                        lender_id = session.record.actor_id,
                        "operator borrowing another live session"
                    );
                    return Some(Arc::clone(handle));
                }
            }
        }

        None
    }

    /// Tear the session down: best-effort logout, wipe credentials, drop the
    /// record, persist. Returns `false` when no session existed.
    pub async fn teardown(&self, actor_id: i64) -> bool {
        let removed = {
            let mut sessions = self.inner.sessions.write().unwrap_or_else(|e| e.into_inner());
            sessions.remove(&actor_id)
        };
        let Some(session) = removed else {
            return false;
        };

        if let Some(handle) = session.handle
            && let Err(e) = handle.logout().await
        {
            debug!(actor_id, error = %e, "logout on teardown failed (ignored)");
        }

        if let Err(e) = tokio::fs::remove_dir_all(&session.record.credential_dir).await {
            warn!(
                actor_id,
                dir = %session.record.credential_dir.display(),
                error = %e,
                "failed to wipe credential dir"
            );
        }

        self.persist().await;
        info!(actor_id, "session torn down");
        true
    }

    /// All records, sorted by actor id.
    pub fn records(&self) -> Vec<SessionRecord> {
        let sessions = self.inner.sessions.read().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<SessionRecord> =
            sessions.values().map(|s| s.record.clone()).collect();
        records.sort_by_key(|r| r.actor_id);
        records
    }

    pub fn get(&self, actor_id: i64) -> Option<SessionRecord> {
        let sessions = self.inner.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(&actor_id).map(|s| s.record.clone())
    }

    pub fn actor_ids(&self) -> Vec<i64> {
        let sessions = self.inner.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.keys().copied().collect()
    }

    /// Number of currently connected sessions.
    pub fn live_count(&self) -> usize {
        let sessions = self.inner.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .values()
            .filter(|s| s.record.status == SessionStatus::Connected)
            .count()
    }

    /// Find a session by the stored chat-platform username.
    pub fn find_by_username(&self, username: &str) -> Option<i64> {
        let sessions = self.inner.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .values()
            .find(|s| s.record.username.as_deref() == Some(username))
            .map(|s| s.record.actor_id)
    }

    async fn transition(&self, actor_id: i64, status: SessionStatus, drop_handle: bool) {
        let changed = {
            let mut sessions = self.inner.sessions.write().unwrap_or_else(|e| e.into_inner());
            match sessions.get_mut(&actor_id) {
                Some(session) => {
                    session.record.status = status;
                    if drop_handle {
                        session.handle = None;
                    }
                    true
                },
                // Torn down while an event was in flight.
                None => false,
            }
        };
        if changed {
            self.persist().await;
        }
    }

    async fn persist(&self) {
        let snapshot = self.records();
        if let Err(e) = json::save(&self.inner.index_path, &snapshot).await {
            warn!(path = %self.inner.index_path.display(), error = %e, "failed to persist session index");
        }
    }
}

fn notify(updates: &Option<PairingSender>, update: PairingUpdate) {
    if let Some(tx) = updates {
        let _ = tx.send(update);
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::{
            Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
    };

    use async_trait::async_trait;

    use {super::*, crate::error::Error};

    struct MockConnection {
        pairing_calls: AtomicUsize,
        logout_calls: AtomicUsize,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl MockConnection {
        fn new() -> Self {
            Self {
                pairing_calls: AtomicUsize::new(0),
                logout_calls: AtomicUsize::new(0),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MessengerConnection for MockConnection {
        async fn request_pairing_code(&self, _number: &str) -> Result<String> {
            self.pairing_calls.fetch_add(1, Ordering::SeqCst);
            Ok("ABCD1234".into())
        }

        async fn send_text(&self, recipient: &str, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((recipient.into(), text.into()));
            Ok(())
        }

        async fn logout(&self) -> Result<()> {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::ConnectionClosed) // teardown must ignore this
        }
    }

    /// Scripted messenger client: each `connect` hands back a controllable
    /// event sender so tests drive the lifecycle.
    struct MockClient {
        connects: AtomicUsize,
        connections: Mutex<Vec<Arc<MockConnection>>>,
        event_senders: Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent>>>,
        fail_connect: AtomicBool,
    }

    impl MockClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                connects: AtomicUsize::new(0),
                connections: Mutex::new(Vec::new()),
                event_senders: Mutex::new(Vec::new()),
                fail_connect: AtomicBool::new(false),
            })
        }

        fn sender(&self, i: usize) -> mpsc::UnboundedSender<ConnectionEvent> {
            self.event_senders.lock().unwrap()[i].clone()
        }

        fn connection(&self, i: usize) -> Arc<MockConnection> {
            Arc::clone(&self.connections.lock().unwrap()[i])
        }
    }

    #[async_trait]
    impl MessengerClient for MockClient {
        async fn connect(
            &self,
            _credential_dir: &Path,
        ) -> Result<(Arc<dyn MessengerConnection>, EventReceiver)> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(Error::ConnectionClosed);
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            let conn = Arc::new(MockConnection::new());
            let (tx, rx) = mpsc::unbounded_channel();
            self.connections.lock().unwrap().push(Arc::clone(&conn));
            self.event_senders.lock().unwrap().push(tx);
            Ok((conn, rx))
        }

        fn is_registered(&self, _credential_dir: &Path) -> bool {
            false
        }
    }

    async fn orchestrator(client: Arc<MockClient>, dir: &Path) -> SessionOrchestrator {
        SessionOrchestrator::load(
            client as Arc<dyn MessengerClient>,
            dir.join("sessions"),
            dir.join("sessions/index.json"),
        )
        .await
        .unwrap()
        .with_reconnect_delay(Duration::from_millis(50))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn pairing_code_requested_exactly_once() {
        let client = MockClient::new();
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(Arc::clone(&client), dir.path()).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        orch.connect(1, "628123", None, Some(tx)).await.unwrap();

        // Duplicate readiness events must not trigger a second request.
        client.sender(0).send(ConnectionEvent::PairingRequired).unwrap();
        client.sender(0).send(ConnectionEvent::PairingRequired).unwrap();
        settle().await;

        assert_eq!(client.connection(0).pairing_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            rx.recv().await,
            Some(PairingUpdate::PairingCode("ABCD1234".into()))
        );

        client.sender(0).send(ConnectionEvent::Open).unwrap();
        settle().await;
        assert_eq!(rx.recv().await, Some(PairingUpdate::Connected));
        assert_eq!(orch.get(1).unwrap().status, SessionStatus::Connected);
        assert_eq!(orch.live_count(), 1);
    }

    #[tokio::test]
    async fn logged_out_close_never_reconnects() {
        let client = MockClient::new();
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(Arc::clone(&client), dir.path()).await;

        orch.connect(1, "628123", None, None).await.unwrap();
        client.sender(0).send(ConnectionEvent::Open).unwrap();
        settle().await;

        client
            .sender(0)
            .send(ConnectionEvent::Closed(DisconnectCause::LoggedOut))
            .unwrap();
        settle().await;
        assert_eq!(orch.get(1).unwrap().status, SessionStatus::Disconnected);

        // Wait well past the reconnect delay.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(client.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_close_reconnects_exactly_once() {
        let client = MockClient::new();
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(Arc::clone(&client), dir.path()).await;

        orch.connect(1, "628123", None, None).await.unwrap();
        client.sender(0).send(ConnectionEvent::Open).unwrap();
        settle().await;

        client
            .sender(0)
            .send(ConnectionEvent::Closed(DisconnectCause::Transport(
                "stream ended".into(),
            )))
            .unwrap();
        settle().await;
        assert_eq!(orch.get(1).unwrap().status, SessionStatus::Disconnected);
        assert_eq!(client.connects.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(client.connects.load(Ordering::SeqCst), 2);
        // The re-attempt goes through the pairing state again.
        assert_eq!(orch.get(1).unwrap().status, SessionStatus::Pairing);
    }

    #[tokio::test]
    async fn stale_reconnect_noops_after_teardown() {
        let client = MockClient::new();
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(Arc::clone(&client), dir.path()).await;

        orch.connect(1, "628123", None, None).await.unwrap();
        client.sender(0).send(ConnectionEvent::Open).unwrap();
        settle().await;
        client
            .sender(0)
            .send(ConnectionEvent::Closed(DisconnectCause::Transport("gone".into())))
            .unwrap();
        settle().await;

        // Teardown lands before the reconnect timer fires.
        assert!(orch.teardown(1).await);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(client.connects.load(Ordering::SeqCst), 1);
        assert!(orch.get(1).is_none());
    }

    #[tokio::test]
    async fn teardown_wipes_credentials_and_ignores_logout_failure() {
        let client = MockClient::new();
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(Arc::clone(&client), dir.path()).await;

        orch.connect(1, "628123", None, None).await.unwrap();
        client.sender(0).send(ConnectionEvent::Open).unwrap();
        settle().await;

        let cred_dir = orch.get(1).unwrap().credential_dir;
        assert!(cred_dir.exists());

        assert!(orch.teardown(1).await);
        assert_eq!(client.connection(0).logout_calls.load(Ordering::SeqCst), 1);
        assert!(!cred_dir.exists());
        assert!(!orch.teardown(1).await);
    }

    #[tokio::test]
    async fn operator_falls_back_to_any_live_session() {
        let client = MockClient::new();
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(Arc::clone(&client), dir.path()).await;

        orch.connect(1, "628123", None, None).await.unwrap();
        client.sender(0).send(ConnectionEvent::Open).unwrap();
        settle().await;

        // Plain actor without a session gets nothing.
        assert!(orch.connection_for(2, false).is_none());
        // Operator without a session borrows actor 1's connection.
        assert!(orch.connection_for(2, true).is_some());
        // Owner still gets their own.
        assert!(orch.connection_for(1, false).is_some());
    }

    #[tokio::test]
    async fn disconnected_session_yields_no_connection() {
        let client = MockClient::new();
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(Arc::clone(&client), dir.path()).await;

        orch.connect(1, "628123", None, None).await.unwrap();
        client.sender(0).send(ConnectionEvent::Open).unwrap();
        settle().await;
        client
            .sender(0)
            .send(ConnectionEvent::Closed(DisconnectCause::LoggedOut))
            .unwrap();
        settle().await;

        assert!(orch.connection_for(1, false).is_none());
        assert_eq!(orch.live_count(), 0);
    }

    #[tokio::test]
    async fn resume_reconnects_previously_connected_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("sessions/index.json");

        // First run: connect and reach Connected, then "restart".
        {
            let client = MockClient::new();
            let orch = orchestrator(Arc::clone(&client), dir.path()).await;
            orch.connect(1, "628123", None, None).await.unwrap();
            client.sender(0).send(ConnectionEvent::Open).unwrap();
            settle().await;
        }

        let client = MockClient::new();
        let orch = SessionOrchestrator::load(
            Arc::clone(&client) as Arc<dyn MessengerClient>,
            dir.path().join("sessions"),
            index_path,
        )
        .await
        .unwrap();

        assert_eq!(orch.get(1).unwrap().status, SessionStatus::Connected);
        orch.resume_persisted().await;
        assert_eq!(client.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_goes_through_the_live_connection() {
        let client = MockClient::new();
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(Arc::clone(&client), dir.path()).await;

        orch.connect(1, "628123", None, None).await.unwrap();
        client.sender(0).send(ConnectionEvent::Open).unwrap();
        settle().await;

        let connection = orch.connection_for(1, false).unwrap();
        connection.send_text("628999", "hello").await.unwrap();

        let sent = client.connection(0).sent.lock().unwrap().clone();
        assert_eq!(sent, vec![("628999".to_string(), "hello".to_string())]);
    }

    #[tokio::test]
    async fn failed_connect_marks_disconnected() {
        let client = MockClient::new();
        client.fail_connect.store(true, Ordering::SeqCst);
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(Arc::clone(&client), dir.path()).await;

        assert!(orch.connect(1, "628123", None, None).await.is_err());
        assert_eq!(orch.get(1).unwrap().status, SessionStatus::Disconnected);
    }
}
