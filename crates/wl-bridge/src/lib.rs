use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;
use wl_api_types::{ChainId, ConnectionSource, Receipt, ReturnStrategy, Session, TON_MAINNET, WalletAddress};

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

// Wallet error codes carried in bridge responses.
pub const UNKNOWN_ERROR_CODE: u32 = 0;
pub const BAD_REQUEST_ERROR_CODE: u32 = 1;
pub const UNKNOWN_APP_ERROR_CODE: u32 = 100;
pub const USER_REJECTED_ERROR_CODE: u32 = 300;
pub const METHOD_NOT_SUPPORTED_ERROR_CODE: u32 = 400;

pub type RequestId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Correlates the eventual `Connected`/`ConnectFailed` event with this attempt.
    pub attempt_id: String,
    pub source: ConnectionSource,
    pub manifest_url: String,
    pub return_strategy: ReturnStrategy,
    pub twa_return_url: Option<String>,
}

/// A session as produced by the bridge, plus the opaque token needed to restore it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstablishedSession {
    pub session: Session,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The user has to open this link in a wallet app; the result arrives as an event.
    Pending { universal_link: String },
    /// The bridge completed the handshake on its own.
    Established(EstablishedSession),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRequest {
    pub id: RequestId,
    pub session_id: String,
    pub method: String,
    /// Serialized request parameters.
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletResponse {
    Confirmed(Receipt),
    Rejected { message: String },
    Failed { code: u32, message: String },
}

impl WalletResponse {
    pub fn from_error(code: u32, message: String) -> Self {
        if code == USER_REJECTED_ERROR_CODE {
            WalletResponse::Rejected { message }
        } else {
            WalletResponse::Failed { code, message }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Connected {
        attempt_id: String,
        established: EstablishedSession,
    },
    ConnectFailed {
        attempt_id: String,
        code: u32,
        message: String,
    },
    /// The wallet ended the session.
    Disconnected { session_id: String },
    Response {
        id: RequestId,
        response: WalletResponse,
    },
}

/// Message relay between this application and the user's wallet app.
///
/// Outcomes of user-facing steps (approving a connection, signing a request)
/// arrive asynchronously on the event stream returned by `subscribe`.
#[async_trait]
pub trait Bridge: Send + Sync {
    fn name(&self) -> &str;
    fn subscribe(&self) -> broadcast::Receiver<BridgeEvent>;
    async fn connect(&self, request: ConnectRequest) -> Result<ConnectOutcome>;
    async fn restore_connection(&self, token: &str) -> Result<Option<EstablishedSession>>;
    async fn disconnect(&self, session_id: &str) -> Result<()>;
    async fn send(&self, request: BridgeRequest) -> Result<()>;
}

pub fn epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

/// Wall-clock seconds, the unit of transaction deadlines.
pub fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

// ── Loopback ──

#[derive(Debug, Clone)]
struct AutoWallet {
    address: String,
    public_key: String,
}

#[derive(Default)]
struct LoopbackState {
    connects: Vec<ConnectRequest>,
    sent: Vec<BridgeRequest>,
    disconnects: Vec<String>,
    restorable: HashMap<String, EstablishedSession>,
    instant: Option<(String, String)>,
    auto_wallet: Option<AutoWallet>,
    send_failure: Option<String>,
    restore_failure: Option<String>,
}

/// In-process bridge where the caller plays the wallet.
///
/// Records everything the application sends and lets the caller emit the
/// events a real wallet would produce. In auto-wallet mode every connection is
/// approved and every request confirmed without intervention.
pub struct LoopbackBridge {
    events: broadcast::Sender<BridgeEvent>,
    state: Mutex<LoopbackState>,
}

impl Default for LoopbackBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBridge {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            events,
            state: Mutex::new(LoopbackState::default()),
        }
    }

    pub fn with_auto_wallet(address: &str, public_key: &str) -> Self {
        let bridge = Self::new();
        bridge.lock().auto_wallet = Some(AutoWallet {
            address: address.to_owned(),
            public_key: public_key.to_owned(),
        });
        bridge
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: BridgeEvent) {
        if self.events.send(event).is_err() {
            debug!("loopback bridge event dropped: no subscribers");
        }
    }

    fn establish(&self, address: &str, public_key: &str) -> EstablishedSession {
        let session_id = Uuid::new_v4().to_string();
        let established = EstablishedSession {
            token: format!("loopback:{session_id}"),
            session: Session {
                session_id,
                wallet_address: WalletAddress(address.to_owned()),
                public_key: public_key.to_owned(),
                chain: ChainId(TON_MAINNET.to_owned()),
                connected_at_epoch_ms: epoch_ms(),
            },
        };
        self.lock()
            .restorable
            .insert(established.token.clone(), established.clone());
        established
    }

    pub fn connect_requests(&self) -> Vec<ConnectRequest> {
        self.lock().connects.clone()
    }

    pub fn last_connect(&self) -> Option<ConnectRequest> {
        self.lock().connects.last().cloned()
    }

    pub fn sent_requests(&self) -> Vec<BridgeRequest> {
        self.lock().sent.clone()
    }

    pub fn disconnect_calls(&self) -> Vec<String> {
        self.lock().disconnects.clone()
    }

    /// The next `connect` resolves immediately instead of returning a link.
    pub fn resolve_next_connect(&self, address: &str, public_key: &str) {
        self.lock().instant = Some((address.to_owned(), public_key.to_owned()));
    }

    pub fn fail_sends(&self, message: &str) {
        self.lock().send_failure = Some(message.to_owned());
    }

    pub fn fail_restores(&self, message: &str) {
        self.lock().restore_failure = Some(message.to_owned());
    }

    /// Approves the given connect attempt as the wallet `address`.
    pub fn approve(&self, attempt_id: &str, address: &str, public_key: &str) -> EstablishedSession {
        let established = self.establish(address, public_key);
        self.emit(BridgeEvent::Connected {
            attempt_id: attempt_id.to_owned(),
            established: established.clone(),
        });
        established
    }

    /// Approves the most recent connect attempt.
    pub fn approve_last(&self, address: &str, public_key: &str) -> Option<EstablishedSession> {
        let attempt_id = self.last_connect()?.attempt_id;
        Some(self.approve(&attempt_id, address, public_key))
    }

    pub fn decline(&self, attempt_id: &str, message: &str) {
        self.emit(BridgeEvent::ConnectFailed {
            attempt_id: attempt_id.to_owned(),
            code: USER_REJECTED_ERROR_CODE,
            message: message.to_owned(),
        });
    }

    /// Wallet-initiated end of a session.
    pub fn revoke(&self, session_id: &str) {
        self.lock()
            .restorable
            .retain(|_, established| established.session.session_id != session_id);
        self.emit(BridgeEvent::Disconnected {
            session_id: session_id.to_owned(),
        });
    }

    pub fn respond(&self, id: &str, response: WalletResponse) {
        self.emit(BridgeEvent::Response {
            id: id.to_owned(),
            response,
        });
    }

    /// Makes `token` restorable as if the wallet remembered the session.
    pub fn allow_restore(&self, established: EstablishedSession) {
        self.lock()
            .restorable
            .insert(established.token.clone(), established);
    }
}

#[async_trait]
impl Bridge for LoopbackBridge {
    fn name(&self) -> &str {
        "loopback"
    }

    fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    async fn connect(&self, request: ConnectRequest) -> Result<ConnectOutcome> {
        let (instant, auto_wallet) = {
            let mut state = self.lock();
            state.connects.push(request.clone());
            (state.instant.take(), state.auto_wallet.clone())
        };

        if let Some((address, public_key)) = instant {
            return Ok(ConnectOutcome::Established(
                self.establish(&address, &public_key),
            ));
        }

        let universal_link = format!(
            "{}?v=2&id={}&ret={}",
            request.source.universal_link,
            request.attempt_id,
            request.return_strategy.as_param()
        );

        if let Some(wallet) = auto_wallet {
            self.approve(&request.attempt_id, &wallet.address, &wallet.public_key);
        }

        Ok(ConnectOutcome::Pending { universal_link })
    }

    async fn restore_connection(&self, token: &str) -> Result<Option<EstablishedSession>> {
        let state = self.lock();
        if let Some(message) = &state.restore_failure {
            return Err(anyhow!("loopback restore failed: {message}"));
        }
        Ok(state.restorable.get(token).cloned())
    }

    async fn disconnect(&self, session_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.disconnects.push(session_id.to_owned());
        state
            .restorable
            .retain(|_, established| established.session.session_id != session_id);
        Ok(())
    }

    async fn send(&self, request: BridgeRequest) -> Result<()> {
        let auto_wallet = {
            let mut state = self.lock();
            if let Some(message) = &state.send_failure {
                return Err(anyhow!("loopback send failed: {message}"));
            }
            state.sent.push(request.clone());
            state.auto_wallet.is_some()
        };

        if auto_wallet {
            self.respond(
                &request.id,
                WalletResponse::Confirmed(Receipt {
                    boc: format!("loopback-receipt:{}", request.id),
                }),
            );
        }
        Ok(())
    }
}
