use std::sync::Arc;
use tracing::{debug, warn};
use wl_bridge::{EstablishedSession, epoch_ms};
use wl_storage::{
    KeyValueStore, SESSION_RECORD_VERSION, SessionRecord, load_session_record,
    save_session_record,
};

/// Best-effort persistence of session continuity data.
///
/// Storage problems are logged and otherwise ignored: losing the record only
/// costs the user a fresh connect on the next start.
pub(crate) struct SessionPersistence {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl SessionPersistence {
    pub(crate) fn new(store: Arc<dyn KeyValueStore>, key: &str) -> Self {
        Self {
            store,
            key: key.to_owned(),
        }
    }

    pub(crate) async fn load(&self) -> Option<SessionRecord> {
        match load_session_record(self.store.as_ref(), &self.key).await {
            Ok(record) => record,
            Err(err) => {
                warn!(key = %self.key, "ignoring unreadable session record: {err:#}");
                None
            }
        }
    }

    pub(crate) async fn save(&self, established: &EstablishedSession) {
        let record = SessionRecord {
            version: SESSION_RECORD_VERSION,
            token: established.token.clone(),
            session: established.session.clone(),
            saved_at_epoch_ms: epoch_ms(),
        };
        match save_session_record(self.store.as_ref(), &self.key, &record).await {
            Ok(()) => debug!(key = %self.key, "session record saved"),
            Err(err) => warn!(key = %self.key, "failed to persist session record: {err:#}"),
        }
    }

    pub(crate) async fn clear(&self) {
        if let Err(err) = self.store.remove(&self.key).await {
            warn!(key = %self.key, "failed to clear session record: {err:#}");
        }
    }
}
