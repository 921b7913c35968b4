use anyhow::{Context, Result, bail};
use std::net::SocketAddr;
use wl_connector::{ConnectorConfig, DEFAULT_MANIFEST_URL, DEFAULT_STORAGE_KEY};
use wl_api_types::ReturnStrategy;

pub(crate) const DEFAULT_ADDR: &str = "0.0.0.0:8080";
pub(crate) const DEFAULT_TX_TTL_SECONDS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BridgeMode {
    Http,
    Loopback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GatewayConfig {
    pub addr: SocketAddr,
    pub manifest_url: String,
    pub bridge_mode: BridgeMode,
    /// Account the loopback bridge approves connections as. Without it the
    /// loopback bridge waits for approvals that never come.
    pub loopback_wallet: Option<String>,
    pub storage_path: Option<String>,
    pub token_recipient: Option<String>,
    /// Jetton price per shop item, indexed by item id.
    pub shop_prices: Vec<u64>,
    pub tx_ttl_seconds: u64,
    pub twa_return_url: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let addr = var("WL_GATEWAY_ADDR")
            .unwrap_or_else(|| DEFAULT_ADDR.to_owned())
            .parse()
            .context("WL_GATEWAY_ADDR must be a socket address")?;

        let bridge_mode = match var("WL_BRIDGE_MODE").as_deref() {
            None | Some("http") => BridgeMode::Http,
            Some("loopback") => BridgeMode::Loopback,
            Some(other) => bail!("WL_BRIDGE_MODE must be 'http' or 'loopback', got '{other}'"),
        };

        let shop_prices = match var("WL_SHOP_PRICES") {
            Some(raw) => raw
                .split(',')
                .map(|price| {
                    price
                        .trim()
                        .parse::<u64>()
                        .with_context(|| format!("invalid shop price '{price}'"))
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let tx_ttl_seconds = match var("WL_TX_TTL_SECONDS") {
            Some(raw) => raw
                .parse()
                .context("WL_TX_TTL_SECONDS must be a number of seconds")?,
            None => DEFAULT_TX_TTL_SECONDS,
        };

        Ok(Self {
            addr,
            manifest_url: var("WL_MANIFEST_URL").unwrap_or_else(|| DEFAULT_MANIFEST_URL.to_owned()),
            bridge_mode,
            loopback_wallet: var("WL_LOOPBACK_WALLET"),
            storage_path: var("WL_STORAGE_PATH"),
            token_recipient: var("WL_TOKEN_RECIPIENT"),
            shop_prices,
            tx_ttl_seconds,
            twa_return_url: var("WL_TWA_RETURN_URL"),
        })
    }

    pub fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig {
            manifest_url: self.manifest_url.clone(),
            storage_key: DEFAULT_STORAGE_KEY.to_owned(),
            return_strategy: ReturnStrategy::Back,
            twa_return_url: self.twa_return_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<GatewayConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() -> Result<()> {
        let config = config(&[])?;
        assert_eq!(config.addr, DEFAULT_ADDR.parse::<SocketAddr>()?);
        assert_eq!(config.bridge_mode, BridgeMode::Http);
        assert_eq!(config.manifest_url, DEFAULT_MANIFEST_URL);
        assert_eq!(config.tx_ttl_seconds, 3600);
        assert!(config.shop_prices.is_empty());
        assert_eq!(config.connector_config().return_strategy, ReturnStrategy::Back);
        Ok(())
    }

    #[test]
    fn values_are_parsed() -> Result<()> {
        let config = config(&[
            ("WL_GATEWAY_ADDR", "127.0.0.1:9000"),
            ("WL_BRIDGE_MODE", "loopback"),
            ("WL_LOOPBACK_WALLET", "0:abc"),
            ("WL_SHOP_PRICES", "0, 150,300"),
            ("WL_TX_TTL_SECONDS", "120"),
            ("WL_TWA_RETURN_URL", " https://t.me/flappybot/game "),
        ])?;
        assert_eq!(config.addr.port(), 9000);
        assert_eq!(config.bridge_mode, BridgeMode::Loopback);
        assert_eq!(config.loopback_wallet.as_deref(), Some("0:abc"));
        assert_eq!(config.shop_prices, vec![0, 150, 300]);
        assert_eq!(config.tx_ttl_seconds, 120);
        assert_eq!(
            config.connector_config().twa_return_url.as_deref(),
            Some("https://t.me/flappybot/game")
        );
        Ok(())
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(config(&[("WL_BRIDGE_MODE", "carrier-pigeon")]).is_err());
        assert!(config(&[("WL_SHOP_PRICES", "10,abc")]).is_err());
        assert!(config(&[("WL_GATEWAY_ADDR", "nowhere")]).is_err());
    }
}
