//! Correlation of outgoing wallet requests with their responses.
//!
//! Each submission is registered under a fresh id before it is handed to the
//! bridge. Whoever removes the entry first decides the outcome: a wallet
//! response, the deadline, or a session teardown. Anything arriving for an id
//! that is no longer registered is dropped.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wl_api_types::{Receipt, TransactionRequest};
use wl_bridge::{Bridge, BridgeRequest, RequestId, WalletResponse, epoch_seconds};

use crate::ConnectError;

pub const SEND_TRANSACTION_METHOD: &str = "sendTransaction";

type Reply = Result<Receipt, ConnectError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Fulfilled,
    Rejected,
    Expired,
}

struct PendingRequest {
    valid_until: u64,
    reply: oneshot::Sender<Reply>,
}

/// A registered request that has not been handed to the bridge yet.
pub(crate) struct InFlight {
    id: RequestId,
    session_id: String,
    payload: String,
    valid_until: u64,
    reply: oneshot::Receiver<Reply>,
}

impl InFlight {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Default)]
pub struct RequestMediator {
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
}

fn until_deadline(valid_until: u64) -> Duration {
    let deadline = UNIX_EPOCH + Duration::from_secs(valid_until);
    deadline
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO)
}

impl RequestMediator {
    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, PendingRequest>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    pub fn state_of(&self, id: &str) -> Option<RequestState> {
        self.lock().get(id).map(|_| RequestState::Pending)
    }

    /// Validates and registers a request for `session_id`.
    ///
    /// Fails with `Expired` without registering anything when the deadline
    /// has already passed.
    pub(crate) fn begin(
        &self,
        session_id: &str,
        request: &TransactionRequest,
    ) -> Result<InFlight, ConnectError> {
        let now = epoch_seconds();
        if request.valid_until <= now {
            return Err(ConnectError::Expired {
                valid_until: request.valid_until,
                now,
            });
        }

        let payload = serde_json::to_string(request).map_err(|err| ConnectError::Remote {
            code: None,
            message: format!("could not encode transaction request: {err}"),
        })?;

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.lock().insert(
            id.clone(),
            PendingRequest {
                valid_until: request.valid_until,
                reply: tx,
            },
        );

        Ok(InFlight {
            id,
            session_id: session_id.to_owned(),
            payload,
            valid_until: request.valid_until,
            reply: rx,
        })
    }

    /// Sends a registered request and waits for its outcome or deadline.
    pub(crate) async fn finish(&self, bridge: &dyn Bridge, in_flight: InFlight) -> Reply {
        let InFlight {
            id,
            session_id,
            payload,
            valid_until,
            mut reply,
        } = in_flight;

        let request = BridgeRequest {
            id: id.clone(),
            session_id,
            method: SEND_TRANSACTION_METHOD.to_owned(),
            payload,
        };
        if let Err(err) = bridge.send(request).await {
            let removed = self.lock().remove(&id).is_some();
            if removed {
                return Err(ConnectError::remote(err));
            }
            // Already settled (e.g. the session went away while sending).
            return reply.await.unwrap_or(Err(ConnectError::Disconnected));
        }
        debug!(request_id = %id, valid_until, "request submitted to bridge");

        let deadline = tokio::time::sleep(until_deadline(valid_until));
        tokio::pin!(deadline);

        tokio::select! {
            biased;
            outcome = &mut reply => outcome.unwrap_or(Err(ConnectError::Disconnected)),
            _ = &mut deadline => {
                if self.expire(&id).is_some() {
                    Err(ConnectError::Timeout { request_id: id })
                } else {
                    reply.await.unwrap_or(Err(ConnectError::Disconnected))
                }
            }
        }
    }

    /// Drops the request `id` once its deadline has passed. Returns `None`
    /// when a response or teardown got there first.
    fn expire(&self, id: &str) -> Option<RequestState> {
        let request = self.lock().remove(id)?;
        warn!(
            request_id = %id,
            valid_until = request.valid_until,
            "request expired without a wallet response"
        );
        Some(RequestState::Expired)
    }

    /// Resolves the request `id` with a wallet response. Returns `None` when
    /// the id is unknown, which is how late and duplicate responses are dropped.
    pub fn settle(&self, id: &str, response: WalletResponse) -> Option<RequestState> {
        let Some(request) = self.lock().remove(id) else {
            debug!(request_id = %id, "discarding response for unknown or finished request");
            return None;
        };

        let (state, outcome) = match response {
            WalletResponse::Confirmed(receipt) => (RequestState::Fulfilled, Ok(receipt)),
            WalletResponse::Rejected { message } => (
                RequestState::Rejected,
                Err(ConnectError::UserRejected { message }),
            ),
            WalletResponse::Failed { code, message } => (
                RequestState::Rejected,
                Err(ConnectError::Remote {
                    code: Some(code),
                    message,
                }),
            ),
        };
        info!(request_id = %id, ?state, "wallet responded");
        if request.reply.send(outcome).is_err() {
            debug!(request_id = %id, "requester went away before the response arrived");
        }
        Some(state)
    }

    /// Fails every pending request with `error`. Returns how many were failed.
    pub fn fail_all(&self, error: ConnectError) -> usize {
        let drained: Vec<(RequestId, PendingRequest)> = self.lock().drain().collect();
        let count = drained.len();
        for (id, request) in drained {
            debug!(request_id = %id, %error, "failing pending request");
            let _ = request.reply.send(Err(error.clone()));
        }
        count
    }
}
