//! Fan-out of wallet status transitions.
//!
//! Every subscriber owns an unbounded queue. `publish` records the new value
//! and pushes it to every queue while holding the hub lock, and `subscribe`
//! seeds a new queue with the current value under the same lock, so each
//! subscriber sees the current value first and then every later transition
//! exactly once, in order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use wl_api_types::Session;

/// `Some` while a wallet is connected, `None` otherwise.
pub type StatusChange = Option<Session>;

#[derive(Default)]
struct HubState {
    current: Option<Session>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<StatusChange>>,
    next_id: u64,
}

#[derive(Clone, Default)]
pub struct StatusHub {
    state: Arc<Mutex<HubState>>,
}

fn lock_hub(state: &Mutex<HubState>) -> MutexGuard<'_, HubState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn deregister(hub: &Weak<Mutex<HubState>>, id: u64) {
    if let Some(state) = hub.upgrade() {
        lock_hub(&state).subscribers.remove(&id);
    }
}

impl StatusHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Session> {
        lock_hub(&self.state).current.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        lock_hub(&self.state).subscribers.len()
    }

    pub fn publish(&self, value: StatusChange) {
        let mut state = lock_hub(&self.state);
        state.current = value.clone();
        state
            .subscribers
            .retain(|_, subscriber| subscriber.send(value.clone()).is_ok());
        debug!(
            connected = value.is_some(),
            subscribers = state.subscribers.len(),
            "wallet status published"
        );
    }

    pub fn subscribe(&self) -> StatusStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock_hub(&self.state);
        let id = state.next_id;
        state.next_id += 1;
        let _ = tx.send(state.current.clone());
        state.subscribers.insert(id, tx);

        StatusStream {
            id,
            rx,
            hub: Arc::downgrade(&self.state),
        }
    }

    /// Runs `callback` on its own task for the current value and every later
    /// transition, until the returned handle is dropped or unsubscribed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_change<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(StatusChange) + Send + 'static,
    {
        let mut stream = self.subscribe();
        let id = stream.id;
        let hub = stream.hub.clone();
        let gate = Arc::new(Mutex::new(true));
        let task_gate = gate.clone();

        let task = tokio::spawn(async move {
            while let Some(change) = stream.recv().await {
                let open = task_gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if !*open {
                    break;
                }
                callback(change);
            }
        });

        Subscription {
            id,
            hub,
            gate,
            task: Some(task),
        }
    }
}

/// Queue of status transitions for one subscriber. Dropping it unsubscribes.
pub struct StatusStream {
    id: u64,
    rx: mpsc::UnboundedReceiver<StatusChange>,
    hub: Weak<Mutex<HubState>>,
}

impl StatusStream {
    /// `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<StatusChange> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StatusChange> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for StatusStream {
    fn drop(&mut self) {
        deregister(&self.hub, self.id);
    }
}

/// Handle for a callback registered with [`StatusHub::on_change`].
///
/// Once `unsubscribe` returns (or the handle is dropped) the callback is not
/// running and will not run again. Safe to call after the hub is gone, but
/// not from inside the callback itself.
#[must_use = "dropping a Subscription unsubscribes its callback"]
pub struct Subscription {
    id: u64,
    hub: Weak<Mutex<HubState>>,
    gate: Arc<Mutex<bool>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        *self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = false;
        deregister(&self.hub, self.id);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
