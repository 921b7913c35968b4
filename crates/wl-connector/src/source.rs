use wl_api_types::{ConnectionSource, PlatformHint};

pub const TONAPI_BRIDGE_URL: &str = "https://bridge.tonapi.io/bridge";
pub const TELEGRAM_WALLET_LINK: &str = "https://t.me/wallet?attach=wallet";
pub const TONKEEPER_LINK: &str = "https://app.tonkeeper.com/ton-connect";
pub const MYTONWALLET_BRIDGE_URL: &str = "https://tonconnectbridge.mytonwallet.org/bridge";
pub const MYTONWALLET_LINK: &str = "https://connect.mytonwallet.org";

/// Picks the bridge endpoint and universal link for a connect attempt.
///
/// Pure and deterministic; callers resolve again for every attempt.
pub fn resolve(hint: &PlatformHint) -> ConnectionSource {
    match hint {
        PlatformHint::Telegram => ConnectionSource {
            bridge_url: TONAPI_BRIDGE_URL.to_owned(),
            universal_link: TELEGRAM_WALLET_LINK.to_owned(),
        },
        PlatformHint::Tonkeeper => ConnectionSource {
            bridge_url: TONAPI_BRIDGE_URL.to_owned(),
            universal_link: TONKEEPER_LINK.to_owned(),
        },
        PlatformHint::MyTonWallet => ConnectionSource {
            bridge_url: MYTONWALLET_BRIDGE_URL.to_owned(),
            universal_link: MYTONWALLET_LINK.to_owned(),
        },
        PlatformHint::Custom {
            bridge_url,
            universal_link,
        } => ConnectionSource {
            bridge_url: bridge_url.trim().trim_end_matches('/').to_owned(),
            universal_link: universal_link.trim().to_owned(),
        },
    }
}
