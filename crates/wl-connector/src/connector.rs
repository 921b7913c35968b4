use std::sync::{Arc, Mutex as StdMutex, OnceLock, Weak};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wl_api_types::{ConnectionSource, PlatformHint, Receipt, Session, TransactionRequest};
use wl_bridge::{Bridge, BridgeEvent, ConnectOutcome, ConnectRequest, EstablishedSession};
use wl_storage::KeyValueStore;

use crate::mediator::RequestMediator;
use crate::persistence::SessionPersistence;
use crate::status::{StatusChange, StatusHub, StatusStream, Subscription};
use crate::{ConnectError, ConnectorConfig, source};

#[derive(Default)]
struct ConnectorState {
    session: Option<Session>,
    pending_attempt: Option<String>,
    /// Bumped on every transition and every new connect attempt. Work that
    /// started under an older generation is discarded when it completes.
    generation: u64,
}

enum Acceptance {
    Accepted(Session),
    AlreadyConnected,
    Stale,
}

struct ConnectorInner {
    persistence: SessionPersistence,
    config: ConnectorConfig,
    bridge: Arc<dyn Bridge>,
    state: Mutex<ConnectorState>,
    hub: StatusHub,
    mediator: RequestMediator,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

impl Drop for ConnectorInner {
    fn drop(&mut self) {
        let pump = self
            .pump
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(pump) = pump {
            pump.abort();
        }
    }
}

/// Owner of the process's single wallet session.
///
/// Cheap to clone; all clones share the same session, subscribers, and
/// pending requests. Build one at startup and hand clones to every component
/// that needs the wallet.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

impl Connector {
    /// Must be called from within a tokio runtime: bridge events are consumed
    /// by a background task.
    pub fn new(
        config: ConnectorConfig,
        bridge: Arc<dyn Bridge>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let events = bridge.subscribe();
        let inner = Arc::new(ConnectorInner {
            persistence: SessionPersistence::new(store, &config.storage_key),
            config,
            bridge,
            state: Mutex::new(ConnectorState::default()),
            hub: StatusHub::new(),
            mediator: RequestMediator::default(),
            pump: StdMutex::new(None),
        });

        let pump = spawn_event_pump(Arc::downgrade(&inner), events);
        *inner
            .pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(pump);

        Self { inner }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.hub.current()
    }

    pub fn is_connected(&self) -> bool {
        self.session().is_some()
    }

    /// Address of the connected wallet, for inclusion in outbound requests.
    pub fn wallet_address(&self) -> Option<String> {
        self.session().map(|session| session.wallet_address.0)
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.mediator.pending_count()
    }

    pub fn status_stream(&self) -> StatusStream {
        self.inner.hub.subscribe()
    }

    pub fn on_status_change<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(StatusChange) + Send + 'static,
    {
        self.inner.hub.on_change(callback)
    }

    /// Starts a new session handshake.
    ///
    /// Returns the link the user has to open in their wallet app, or `None`
    /// when the bridge completed the handshake by itself. A connect issued
    /// while an earlier attempt is still waiting for the wallet replaces it.
    pub async fn connect(&self, source: ConnectionSource) -> Result<Option<String>, ConnectError> {
        let attempt_id = Uuid::new_v4().to_string();
        {
            let mut state = self.inner.state.lock().await;
            if state.session.is_some() {
                return Err(ConnectError::AlreadyConnected);
            }
            if let Some(previous) = state.pending_attempt.replace(attempt_id.clone()) {
                debug!(%previous, %attempt_id, "superseding pending connect attempt");
            }
            state.generation += 1;
        }

        let config = &self.inner.config;
        let request = ConnectRequest {
            attempt_id: attempt_id.clone(),
            source,
            manifest_url: config.manifest_url.clone(),
            return_strategy: config.return_strategy.clone(),
            twa_return_url: config.twa_return_url.clone(),
        };

        let outcome = match self.inner.bridge.connect(request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let mut state = self.inner.state.lock().await;
                if state.pending_attempt.as_deref() == Some(attempt_id.as_str()) {
                    state.pending_attempt = None;
                }
                warn!(%attempt_id, bridge = self.inner.bridge.name(), "connect failed: {err:#}");
                return Err(ConnectError::remote(err));
            }
        };

        match outcome {
            ConnectOutcome::Pending { universal_link } => {
                info!(%attempt_id, bridge = self.inner.bridge.name(), "connect link issued");
                Ok(Some(universal_link))
            }
            ConnectOutcome::Established(established) => {
                match self.inner.accept(&attempt_id, established).await {
                    Acceptance::Accepted(_) => Ok(None),
                    Acceptance::AlreadyConnected => Err(ConnectError::AlreadyConnected),
                    Acceptance::Stale => Err(ConnectError::Remote {
                        code: None,
                        message: "connect attempt was superseded".to_owned(),
                    }),
                }
            }
        }
    }

    pub async fn connect_with_hint(&self, hint: &PlatformHint) -> Result<Option<String>, ConnectError> {
        self.connect(source::resolve(hint)).await
    }

    /// Ends the live session. A no-op when nothing is connected.
    ///
    /// Local state is torn down first: pending requests fail with
    /// `Disconnected`, the persisted record is cleared, and subscribers are
    /// notified, all before the bridge is told. A bridge failure is still
    /// reported to the caller.
    pub async fn disconnect(&self) -> Result<(), ConnectError> {
        let session = {
            let mut state = self.inner.state.lock().await;
            match self.inner.teardown(&mut state).await {
                Some(session) => session,
                None => return Ok(()),
            }
        };

        self.inner
            .bridge
            .disconnect(&session.session_id)
            .await
            .map_err(|err| {
                warn!(session_id = %session.session_id, "bridge disconnect failed: {err:#}");
                ConnectError::remote(err)
            })
    }

    /// Silently re-establishes the previously persisted session.
    ///
    /// Never prompts the user and never fails: anything that prevents a
    /// restore yields `None`. With nothing persisted the live state is left
    /// untouched.
    pub async fn restore_connection(&self) -> Option<Session> {
        let record = self.inner.persistence.load().await?;

        let generation = {
            let state = self.inner.state.lock().await;
            if let Some(session) = &state.session {
                return Some(session.clone());
            }
            state.generation
        };

        let restored = match self.inner.bridge.restore_connection(&record.token).await {
            Ok(Some(restored)) => restored,
            Ok(None) => {
                let state = self.inner.state.lock().await;
                if state.generation == generation {
                    self.inner.persistence.clear().await;
                }
                info!(
                    address = %record.session.address(),
                    "persisted wallet session is no longer valid"
                );
                return None;
            }
            Err(err) => {
                warn!("wallet session restore failed: {err:#}");
                return None;
            }
        };

        let mut state = self.inner.state.lock().await;
        if state.generation != generation || state.session.is_some() {
            debug!("discarding restored session: state changed while restoring");
            return state.session.clone();
        }
        state.pending_attempt = None;
        Some(self.inner.establish(&mut state, restored).await)
    }

    /// Submits a transaction to the connected wallet and waits for the outcome.
    ///
    /// Concurrent submissions are not deduplicated; callers own that.
    pub async fn send_transaction(&self, request: TransactionRequest) -> Result<Receipt, ConnectError> {
        let in_flight = {
            let state = self.inner.state.lock().await;
            let session = state.session.as_ref().ok_or(ConnectError::NoSession)?;
            self.inner.mediator.begin(&session.session_id, &request)?
        };
        debug!(request_id = %in_flight.id(), "submitting transaction");

        self.inner
            .mediator
            .finish(self.inner.bridge.as_ref(), in_flight)
            .await
    }
}

impl ConnectorInner {
    async fn apply(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Connected {
                attempt_id,
                established,
            } => match self.accept(&attempt_id, established).await {
                Acceptance::Accepted(_) => {}
                Acceptance::AlreadyConnected => {
                    debug!(%attempt_id, "ignoring connect event: a session is already live")
                }
                Acceptance::Stale => {
                    debug!(%attempt_id, "ignoring connect event for a superseded attempt")
                }
            },
            BridgeEvent::ConnectFailed {
                attempt_id,
                code,
                message,
            } => {
                let mut state = self.state.lock().await;
                if state.pending_attempt.as_deref() == Some(attempt_id.as_str()) {
                    state.pending_attempt = None;
                    info!(%attempt_id, code, %message, "wallet declined the connection");
                } else {
                    debug!(%attempt_id, "ignoring connect failure for a superseded attempt");
                }
            }
            BridgeEvent::Disconnected { session_id } => {
                let mut state = self.state.lock().await;
                let live = state
                    .session
                    .as_ref()
                    .is_some_and(|session| session.session_id == session_id);
                if !live {
                    debug!(%session_id, "ignoring disconnect for a session that is not live");
                    return;
                }
                self.teardown(&mut state).await;
                info!(%session_id, "wallet ended the session");
            }
            BridgeEvent::Response { id, response } => {
                self.mediator.settle(&id, response);
            }
        }
    }

    async fn accept(&self, attempt_id: &str, established: EstablishedSession) -> Acceptance {
        let mut state = self.state.lock().await;
        if state.session.is_some() {
            return Acceptance::AlreadyConnected;
        }
        if state.pending_attempt.as_deref() != Some(attempt_id) {
            return Acceptance::Stale;
        }
        state.pending_attempt = None;
        Acceptance::Accepted(self.establish(&mut state, established).await)
    }

    /// Makes `established` the live session. The caller holds the state lock.
    async fn establish(&self, state: &mut ConnectorState, established: EstablishedSession) -> Session {
        self.persistence.save(&established).await;

        let session = established.session;
        state.generation += 1;
        state.session = Some(session.clone());
        self.hub.publish(Some(session.clone()));
        info!(
            address = %session.address(),
            session_id = %session.session_id,
            "wallet session established"
        );
        session
    }

    /// Ends the live session, if any. The caller holds the state lock.
    async fn teardown(&self, state: &mut ConnectorState) -> Option<Session> {
        let session = state.session.take()?;
        state.generation += 1;

        let failed = self.mediator.fail_all(ConnectError::Disconnected);
        self.persistence.clear().await;
        self.hub.publish(None);
        info!(
            address = %session.address(),
            failed_requests = failed,
            "wallet session closed"
        );
        Some(session)
    }
}

fn spawn_event_pump(
    inner: Weak<ConnectorInner>,
    mut events: broadcast::Receiver<BridgeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "bridge events lagged; some were dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("bridge event stream closed");
                    break;
                }
            };
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.apply(event).await;
        }
    })
}

/// Holds the process's connector once it has been created.
///
/// The first configuration wins. Later calls with a different configuration
/// get the existing connector back and a warning in the log.
#[derive(Default)]
pub struct ConnectorSlot {
    cell: OnceLock<Connector>,
}

impl ConnectorSlot {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Option<Connector> {
        self.cell.get().cloned()
    }

    pub fn get_or_create(
        &self,
        config: ConnectorConfig,
        bridge: Arc<dyn Bridge>,
        store: Arc<dyn KeyValueStore>,
    ) -> Connector {
        let connector = self
            .cell
            .get_or_init(|| Connector::new(config.clone(), bridge, store));
        if connector.config() != &config {
            warn!(
                existing = ?connector.config(),
                requested = ?config,
                "connector already created; ignoring the new configuration"
            );
        }
        connector.clone()
    }
}
