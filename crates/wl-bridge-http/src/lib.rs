use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wl_api_types::{ChainId, Session, WalletAddress};
use wl_bridge::{
    Bridge, BridgeEvent, BridgeRequest, ConnectOutcome, ConnectRequest, EVENT_CHANNEL_CAPACITY,
    EstablishedSession, epoch_ms,
};

mod link;
mod sse;
mod wire;

pub use link::{PROTOCOL_VERSION, connect_request_json, universal_link};
pub use sse::{SseEvent, SseParser};
pub use wire::{WalletMessage, decode_frame, decode_message, encode_request};

/// Relay-side lifetime of a message sent to the wallet.
pub const MESSAGE_TTL_SECONDS: u64 = 300;
const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);
const DISCONNECT_METHOD: &str = "disconnect";

/// What `restore_connection` needs to reattach to a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct SessionToken {
    client_id: String,
    wallet_client_id: String,
    bridge_url: String,
    session: Session,
}

struct Attempt {
    attempt_id: String,
    bridge_url: String,
}

struct LiveSession {
    wallet_client_id: String,
    bridge_url: String,
}

#[derive(Default)]
struct HttpState {
    /// Keyed by our client id.
    attempts: HashMap<String, Attempt>,
    /// Keyed by our client id, which doubles as the session id.
    sessions: HashMap<String, LiveSession>,
    listeners: HashMap<String, JoinHandle<()>>,
}

struct Shared {
    http: reqwest::Client,
    events: broadcast::Sender<BridgeEvent>,
    state: Mutex<HttpState>,
}

/// Bridge over an HTTP relay.
///
/// Each connect attempt gets a fresh client id with its own event-stream
/// listener. Once the wallet approves, that client id identifies the session.
pub struct HttpBridge {
    shared: Arc<Shared>,
}

impl Default for HttpBridge {
    fn default() -> Self {
        Self::new()
    }
}

fn random_client_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

impl HttpBridge {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                http,
                events,
                state: Mutex::new(HttpState::default()),
            }),
        }
    }

    fn spawn_listener(&self, client_id: &str, bridge_url: &str, opened: reqwest::Response) {
        let handle = tokio::spawn(listen(
            self.shared.clone(),
            client_id.to_owned(),
            bridge_url.to_owned(),
            opened,
        ));
        if let Some(previous) = self
            .shared
            .lock()
            .listeners
            .insert(client_id.to_owned(), handle)
        {
            previous.abort();
        }
    }
}

impl Drop for HttpBridge {
    fn drop(&mut self) {
        for (_, listener) in self.shared.lock().listeners.drain() {
            listener.abort();
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HttpState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: BridgeEvent) {
        if self.events.send(event).is_err() {
            debug!("bridge event dropped: no subscribers");
        }
    }

    async fn open_events(
        &self,
        bridge_url: &str,
        client_id: &str,
        last_event_id: Option<&str>,
    ) -> Result<reqwest::Response> {
        let mut query = vec![("client_id", client_id)];
        if let Some(last) = last_event_id {
            query.push(("last_event_id", last));
        }

        let response = self
            .http
            .get(format!("{bridge_url}/events"))
            .query(&query)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .context("bridge events transport")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("bridge events HTTP {status}: {text}");
        }
        Ok(response)
    }

    async fn post_message(&self, bridge_url: &str, client_id: &str, to: &str, body: String) -> Result<()> {
        let ttl = MESSAGE_TTL_SECONDS.to_string();
        let response = self
            .http
            .post(format!("{bridge_url}/message"))
            .query(&[("client_id", client_id), ("to", to), ("ttl", ttl.as_str())])
            .body(body)
            .send()
            .await
            .context("bridge message transport")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("bridge message HTTP {status}: {text}");
        }
        Ok(())
    }

    /// Stops following `client_id`'s event stream.
    fn retire_listener(&self, client_id: &str) {
        if let Some(listener) = self.lock().listeners.remove(client_id) {
            debug!(%client_id, "stopping bridge event listener");
            listener.abort();
        }
    }

    /// Applies one `data:` frame received on `client_id`'s stream. Returns
    /// `false` once nothing more is expected on that stream.
    fn handle_data(&self, client_id: &str, data: &str) -> bool {
        let (from, message) = match wire::decode_frame(data) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(%client_id, "dropping undecodable bridge frame: {err:#}");
                return true;
            }
        };

        match message {
            WalletMessage::Connect {
                address,
                network,
                public_key,
            } => {
                let Some(attempt) = self.lock().attempts.remove(client_id) else {
                    debug!(%client_id, "connect event for an unknown attempt");
                    return true;
                };
                let session = Session {
                    session_id: client_id.to_owned(),
                    wallet_address: WalletAddress(address),
                    public_key,
                    chain: ChainId(network),
                    connected_at_epoch_ms: epoch_ms(),
                };
                let token = SessionToken {
                    client_id: client_id.to_owned(),
                    wallet_client_id: from.clone(),
                    bridge_url: attempt.bridge_url.clone(),
                    session: session.clone(),
                };
                let token = match serde_json::to_string(&token) {
                    Ok(token) => token,
                    Err(err) => {
                        warn!(%client_id, "could not encode session token: {err}");
                        return true;
                    }
                };
                self.lock().sessions.insert(
                    client_id.to_owned(),
                    LiveSession {
                        wallet_client_id: from,
                        bridge_url: attempt.bridge_url,
                    },
                );
                info!(%client_id, address = %session.address(), "wallet approved connection");
                self.emit(BridgeEvent::Connected {
                    attempt_id: attempt.attempt_id,
                    established: EstablishedSession { session, token },
                });
                true
            }
            WalletMessage::ConnectError { code, message } => {
                let Some(attempt) = self.lock().attempts.remove(client_id) else {
                    debug!(%client_id, "connect error for an unknown attempt");
                    return true;
                };
                self.retire_listener(client_id);
                self.emit(BridgeEvent::ConnectFailed {
                    attempt_id: attempt.attempt_id,
                    code,
                    message,
                });
                false
            }
            WalletMessage::Disconnect => {
                if self.lock().sessions.remove(client_id).is_none() {
                    debug!(%client_id, "disconnect event for an unknown session");
                    return true;
                }
                self.retire_listener(client_id);
                info!(%client_id, "wallet disconnected");
                self.emit(BridgeEvent::Disconnected {
                    session_id: client_id.to_owned(),
                });
                false
            }
            WalletMessage::Response { id, response } => {
                self.emit(BridgeEvent::Response { id, response });
                true
            }
        }
    }
}

/// Follows `client_id`'s event stream, reconnecting with backoff until aborted.
async fn listen(shared: Arc<Shared>, client_id: String, bridge_url: String, opened: reqwest::Response) {
    let mut parser = SseParser::default();
    let mut backoff = RECONNECT_MIN;
    let mut next = Some(opened);

    loop {
        let mut response = match next.take() {
            Some(response) => response,
            None => match shared
                .open_events(&bridge_url, &client_id, parser.last_event_id())
                .await
            {
                Ok(response) => {
                    backoff = RECONNECT_MIN;
                    response
                }
                Err(err) => {
                    warn!(%client_id, "reopening bridge event stream failed: {err:#}");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(RECONNECT_MAX);
                    continue;
                }
            },
        };

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    for event in parser.push(&bytes) {
                        if event.is_message() && !shared.handle_data(&client_id, &event.data) {
                            return;
                        }
                    }
                }
                Ok(None) => {
                    debug!(%client_id, "bridge event stream ended");
                    break;
                }
                Err(err) => {
                    warn!(%client_id, "bridge event stream broke: {err}");
                    break;
                }
            }
        }
        parser.reset();
        tokio::time::sleep(RECONNECT_MIN).await;
    }
}

#[async_trait]
impl Bridge for HttpBridge {
    fn name(&self) -> &str {
        "http"
    }

    fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.shared.events.subscribe()
    }

    async fn connect(&self, request: ConnectRequest) -> Result<ConnectOutcome> {
        let client_id = random_client_id();
        let bridge_url = request.source.bridge_url.trim_end_matches('/').to_owned();
        let link = universal_link(&request, &client_id)?;

        let opened = self
            .shared
            .open_events(&bridge_url, &client_id, None)
            .await
            .context("open bridge event stream")?;

        let abandoned: Vec<String> = {
            let mut state = self.shared.lock();
            let abandoned = state.attempts.drain().map(|(id, _)| id).collect();
            state.attempts.insert(
                client_id.clone(),
                Attempt {
                    attempt_id: request.attempt_id.clone(),
                    bridge_url: bridge_url.clone(),
                },
            );
            abandoned
        };
        for id in abandoned {
            if let Some(listener) = self.shared.lock().listeners.remove(&id) {
                listener.abort();
            }
        }

        self.spawn_listener(&client_id, &bridge_url, opened);
        info!(attempt_id = %request.attempt_id, %client_id, %bridge_url, "waiting for wallet approval");
        Ok(ConnectOutcome::Pending {
            universal_link: link,
        })
    }

    async fn restore_connection(&self, token: &str) -> Result<Option<EstablishedSession>> {
        let parsed: SessionToken = match serde_json::from_str(token) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("ignoring unreadable session token: {err}");
                return Ok(None);
            }
        };

        let opened = self
            .shared
            .open_events(&parsed.bridge_url, &parsed.client_id, None)
            .await
            .context("reopen bridge event stream")?;

        self.shared.lock().sessions.insert(
            parsed.client_id.clone(),
            LiveSession {
                wallet_client_id: parsed.wallet_client_id.clone(),
                bridge_url: parsed.bridge_url.clone(),
            },
        );
        self.spawn_listener(&parsed.client_id, &parsed.bridge_url, opened);
        info!(client_id = %parsed.client_id, "bridge session reattached");

        Ok(Some(EstablishedSession {
            session: parsed.session,
            token: token.to_owned(),
        }))
    }

    async fn disconnect(&self, session_id: &str) -> Result<()> {
        let (live, listener) = {
            let mut state = self.shared.lock();
            (state.sessions.remove(session_id), state.listeners.remove(session_id))
        };
        if let Some(listener) = listener {
            listener.abort();
        }
        let live = live.ok_or_else(|| anyhow!("unknown bridge session {session_id}"))?;

        let id = epoch_ms().to_string();
        let body = encode_request(DISCONNECT_METHOD, &[], &id)?;
        self.shared
            .post_message(&live.bridge_url, session_id, &live.wallet_client_id, body)
            .await
    }

    async fn send(&self, request: BridgeRequest) -> Result<()> {
        let (bridge_url, wallet_client_id) = {
            let state = self.shared.lock();
            let live = state
                .sessions
                .get(&request.session_id)
                .ok_or_else(|| anyhow!("unknown bridge session {}", request.session_id))?;
            (live.bridge_url.clone(), live.wallet_client_id.clone())
        };

        let body = encode_request(&request.method, &[request.payload.as_str()], &request.id)?;
        self.shared
            .post_message(&bridge_url, &request.session_id, &wallet_client_id, body)
            .await?;
        debug!(request_id = %request.id, method = %request.method, "request posted to bridge");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use tokio::sync::oneshot;
    use wl_bridge::WalletResponse;

    fn frame(from: &str, message: &str) -> String {
        serde_json::json!({ "from": from, "message": STANDARD.encode(message) }).to_string()
    }

    fn with_attempt(bridge: &HttpBridge, client_id: &str, attempt_id: &str) {
        bridge.shared.lock().attempts.insert(
            client_id.to_owned(),
            Attempt {
                attempt_id: attempt_id.to_owned(),
                bridge_url: "https://relay.example/bridge".to_owned(),
            },
        );
    }

    const CONNECT: &str = r#"{"event":"connect","id":1,"payload":{"items":[{"name":"ton_addr","address":"0:83df","network":"-239","publicKey":"ab12"}]}}"#;

    #[test]
    fn client_ids_are_random_hex() {
        let first = random_client_id();
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, random_client_id());
    }

    #[tokio::test]
    async fn approval_emits_connected_with_restorable_token() -> Result<()> {
        let bridge = HttpBridge::new();
        let mut events = bridge.subscribe();
        with_attempt(&bridge, "c1", "attempt-1");

        bridge.shared.handle_data("c1", &frame("w1", CONNECT));

        let BridgeEvent::Connected {
            attempt_id,
            established,
        } = events.recv().await?
        else {
            panic!("expected a connected event");
        };
        assert_eq!(attempt_id, "attempt-1");
        assert_eq!(established.session.session_id, "c1");
        assert_eq!(established.session.address(), "0:83df");

        let token: SessionToken = serde_json::from_str(&established.token)?;
        assert_eq!(token.wallet_client_id, "w1");
        assert_eq!(token.bridge_url, "https://relay.example/bridge");
        assert_eq!(token.session, established.session);
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_and_responses_are_forwarded() -> Result<()> {
        let bridge = HttpBridge::new();
        let mut events = bridge.subscribe();
        with_attempt(&bridge, "c1", "attempt-1");
        bridge.shared.handle_data("c1", &frame("w1", CONNECT));
        events.recv().await?;

        bridge
            .shared
            .handle_data("c1", &frame("w1", r#"{"id":"r1","result":"te6ok"}"#));
        assert_eq!(
            events.recv().await?,
            BridgeEvent::Response {
                id: "r1".to_owned(),
                response: WalletResponse::Confirmed(wl_api_types::Receipt {
                    boc: "te6ok".to_owned()
                }),
            }
        );

        bridge
            .shared
            .handle_data("c1", &frame("w1", r#"{"event":"disconnect","id":3,"payload":{}}"#));
        assert_eq!(
            events.recv().await?,
            BridgeEvent::Disconnected {
                session_id: "c1".to_owned()
            }
        );

        // A second disconnect for the same client id is not repeated.
        bridge
            .shared
            .handle_data("c1", &frame("w1", r#"{"event":"disconnect","id":4,"payload":{}}"#));
        assert!(events.try_recv().is_err());
        Ok(())
    }

    /// Registers a stand-in listener for `client_id`. The returned receiver
    /// resolves once the listener task has been torn down.
    fn with_listener(bridge: &HttpBridge, client_id: &str) -> oneshot::Receiver<()> {
        let (alive, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _alive = alive;
            std::future::pending::<()>().await;
        });
        bridge
            .shared
            .lock()
            .listeners
            .insert(client_id.to_owned(), handle);
        stopped
    }

    const DECLINE: &str = r#"{"event":"connect_error","id":2,"payload":{"code":300,"message":"no"}}"#;
    const WALLET_DISCONNECT: &str = r#"{"event":"disconnect","id":3,"payload":{}}"#;

    #[tokio::test]
    async fn declined_attempt_stops_its_listener() -> Result<()> {
        let bridge = HttpBridge::new();
        let mut events = bridge.subscribe();
        with_attempt(&bridge, "c1", "attempt-1");
        let stopped = with_listener(&bridge, "c1");

        let keep_listening = bridge.shared.handle_data("c1", &frame("w1", DECLINE));

        assert!(!keep_listening);
        assert!(matches!(
            events.recv().await?,
            BridgeEvent::ConnectFailed { code: 300, .. }
        ));
        assert!(bridge.shared.lock().listeners.is_empty());
        assert!(
            tokio::time::timeout(Duration::from_secs(1), stopped)
                .await?
                .is_err()
        );
        Ok(())
    }

    #[tokio::test]
    async fn wallet_disconnect_stops_the_session_listener() -> Result<()> {
        let bridge = HttpBridge::new();
        let mut events = bridge.subscribe();
        with_attempt(&bridge, "c1", "attempt-1");
        let stopped = with_listener(&bridge, "c1");

        assert!(bridge.shared.handle_data("c1", &frame("w1", CONNECT)));
        events.recv().await?;
        assert!(bridge.shared.lock().listeners.contains_key("c1"));

        let keep_listening = bridge
            .shared
            .handle_data("c1", &frame("w1", WALLET_DISCONNECT));

        assert!(!keep_listening);
        assert!(matches!(events.recv().await?, BridgeEvent::Disconnected { .. }));
        assert!(!bridge.shared.lock().listeners.contains_key("c1"));
        assert!(
            tokio::time::timeout(Duration::from_secs(1), stopped)
                .await?
                .is_err()
        );
        Ok(())
    }

    #[tokio::test]
    async fn unrelated_listeners_survive_a_decline() {
        let bridge = HttpBridge::new();
        with_attempt(&bridge, "c1", "attempt-1");
        let _declined = with_listener(&bridge, "c1");
        let _live = with_listener(&bridge, "c0");

        bridge.shared.handle_data("c1", &frame("w1", DECLINE));

        let state = bridge.shared.lock();
        assert_eq!(state.listeners.len(), 1);
        assert!(state.listeners.contains_key("c0"));
    }

    #[tokio::test]
    async fn events_for_unknown_attempts_are_dropped() {
        let bridge = HttpBridge::new();
        let mut events = bridge.subscribe();

        bridge.shared.handle_data("stranger", &frame("w1", CONNECT));
        bridge.shared.handle_data("stranger", "garbage");

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_requires_known_session() {
        let bridge = HttpBridge::new();
        let outcome = bridge
            .send(BridgeRequest {
                id: "r1".to_owned(),
                session_id: "nope".to_owned(),
                method: "sendTransaction".to_owned(),
                payload: "{}".to_owned(),
            })
            .await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn unreadable_token_restores_nothing() -> Result<()> {
        let bridge = HttpBridge::new();
        assert_eq!(bridge.restore_connection("not-a-token").await?, None);
        Ok(())
    }
}
