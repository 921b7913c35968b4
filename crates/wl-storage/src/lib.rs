use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use wl_api_types::Session;

/// Local persisted key/value storage used to carry a wallet session across restarts.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
pub struct NoopStore;

#[async_trait]
impl KeyValueStore for NoopStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    values: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let guard = self.values.read().await;
        Ok(guard.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self.values.write().await;
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut guard = self.values.write().await;
        guard.remove(key);
        Ok(())
    }
}

#[cfg(feature = "rocksdb")]
pub use rocks::RocksDbStore;

#[cfg(feature = "rocksdb")]
mod rocks {
    use super::*;
    use rocksdb::{DB, Options};
    use std::sync::Arc;

    pub struct RocksDbStore {
        db: Arc<DB>,
    }

    impl RocksDbStore {
        pub fn open_default(path: &str) -> Result<Self> {
            let mut options = Options::default();
            options.create_if_missing(true);
            let db = DB::open(&options, path)
                .with_context(|| format!("failed to open RocksDB at {path}"))?;
            Ok(Self { db: Arc::new(db) })
        }

        fn key_for(key: &str) -> String {
            format!("kv:{key}")
        }
    }

    #[async_trait]
    impl KeyValueStore for RocksDbStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            let value = self.db.get(Self::key_for(key).as_bytes())?;
            match value {
                Some(raw) => Ok(Some(
                    String::from_utf8(raw).context("stored value is not utf-8")?,
                )),
                None => Ok(None),
            }
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.db.put(Self::key_for(key).as_bytes(), value.as_bytes())?;
            Ok(())
        }

        async fn remove(&self, key: &str) -> Result<()> {
            self.db.delete(Self::key_for(key).as_bytes())?;
            Ok(())
        }
    }
}

pub const SESSION_RECORD_VERSION: u32 = 1;

/// Session continuity data written after a successful connect and read back on startup.
///
/// `token` is opaque bridge state; it must come back byte-for-byte identical.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub version: u32,
    pub token: String,
    pub session: Session,
    pub saved_at_epoch_ms: u128,
}

pub async fn save_session_record(
    store: &dyn KeyValueStore,
    key: &str,
    record: &SessionRecord,
) -> Result<()> {
    let value = serde_json::to_string(record)?;
    store.set(key, &value).await
}

/// `Ok(None)` when nothing is stored; an error when something is stored but unreadable.
pub async fn load_session_record(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<SessionRecord>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };

    let record = serde_json::from_str::<SessionRecord>(&raw)
        .with_context(|| format!("malformed session record under {key}"))?;
    if record.version != SESSION_RECORD_VERSION {
        anyhow::bail!(
            "unsupported session record version {} under {key}",
            record.version
        );
    }
    Ok(Some(record))
}
