use serde::{Deserialize, Serialize};
use wl_api_types::ReturnStrategy;

pub const DEFAULT_MANIFEST_URL: &str = "https://raw.githubusercontent.com/ton-defi-org/tonconnect-manifest-temp/main/tonconnect-manifest.json";
pub const DEFAULT_STORAGE_KEY: &str = "wl-connect:session";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Public URL of the app manifest the wallet shows to the user.
    pub manifest_url: String,
    /// Key under which session continuity data is persisted.
    pub storage_key: String,
    pub return_strategy: ReturnStrategy,
    /// Telegram mini-app link the wallet returns to, when running inside Telegram.
    pub twa_return_url: Option<String>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            manifest_url: DEFAULT_MANIFEST_URL.to_owned(),
            storage_key: DEFAULT_STORAGE_KEY.to_owned(),
            return_strategy: ReturnStrategy::Back,
            twa_return_url: None,
        }
    }
}
