use serde::{Deserialize, Serialize};

pub mod locale;

pub const TON_MAINNET: &str = "-239";
pub const TON_TESTNET: &str = "-3";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WalletAddress(pub String);

impl WalletAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainId(pub String);

/// An established link between this process and the user's wallet.
///
/// `session_id` identifies the bridge session the link was made over and is
/// used to tell a revocation of this session apart from one of an older session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub wallet_address: WalletAddress,
    pub public_key: String,
    pub chain: ChainId,
    pub connected_at_epoch_ms: u128,
}

impl Session {
    pub fn address(&self) -> &str {
        self.wallet_address.as_str()
    }
}

/// Where and how a new bridge session is initiated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSource {
    pub bridge_url: String,
    pub universal_link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PlatformHint {
    #[default]
    Telegram,
    Tonkeeper,
    MyTonWallet,
    Custom {
        bridge_url: String,
        universal_link: String,
    },
}

/// What the wallet app should do after the user acts on a deep link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStrategy {
    #[default]
    Back,
    None,
    Url(String),
}

impl ReturnStrategy {
    pub fn as_param(&self) -> &str {
        match self {
            ReturnStrategy::Back => "back",
            ReturnStrategy::None => "none",
            ReturnStrategy::Url(url) => url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMessage {
    pub address: String,
    /// Attached value in nanotons, decimal string.
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_init: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    /// Absolute deadline, unix seconds.
    pub valid_until: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub messages: Vec<TransactionMessage>,
}

/// The wallet's confirmation of a signed and broadcast transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub boc: String,
}

// Gateway request and response bodies.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonView {
    pub label: String,
    pub menu: Vec<String>,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletStatusResponse {
    pub connected: bool,
    pub wallet_address: Option<String>,
    pub friendly_address: Option<String>,
    pub connected_at_epoch_ms: Option<u128>,
    pub game_unlocked: bool,
    pub button: ButtonView,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletConnectRequest {
    #[serde(default)]
    pub platform: Option<PlatformHint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConnectResponse {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRestoreResponse {
    pub session: Option<Session>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopBuyRequest {
    pub item_id: u32,
    pub telegram_user_id: i64,
    pub jetton_wallet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopBuyResponse {
    pub item_id: u32,
    pub price: u64,
    pub receipt: Receipt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GamePlayedRequest {
    pub tg_data: String,
    pub score: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Purchase {
    #[serde(rename = "systemName")]
    pub system_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PlayedOutcome {
    Rewarded { reward: u64, achievements: Vec<String> },
    Failed { error: String },
}
