use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use wl_api_types::{PlayedOutcome, Purchase};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:3000";
pub const PRODUCTION_ENDPOINT: &str = "https://flappy.krigga.dev";

/// Client for the game backend that scores runs and records shop purchases.
///
/// Reads `WL_GAME_ENDPOINT` from environment at construction time
/// (default: `http://localhost:3000`).
#[derive(Debug, Clone)]
pub struct GameApiClient {
    endpoint: String,
    http: reqwest::Client,
}

impl Default for GameApiClient {
    fn default() -> Self {
        Self::new(None)
    }
}

#[derive(Debug, Serialize)]
struct PlayedRequest<'a> {
    tg_data: &'a str,
    wallet: Option<&'a str>,
    score: u64,
}

#[derive(Debug, Deserialize)]
struct PurchasesResponse {
    ok: bool,
    #[serde(default)]
    purchases: Vec<Purchase>,
}

impl GameApiClient {
    pub fn new(endpoint: Option<String>) -> Self {
        let endpoint = endpoint
            .or_else(|| std::env::var("WL_GAME_ENDPOINT").ok())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Reports a finished run. `wallet` is the connected address, if any.
    pub async fn report_played(
        &self,
        tg_data: &str,
        wallet: Option<&str>,
        score: u64,
    ) -> Result<PlayedOutcome> {
        let url = format!("{}/played", self.endpoint);
        let response = self
            .http
            .post(&url)
            .json(&PlayedRequest {
                tg_data,
                wallet,
                score,
            })
            .send()
            .await
            .context("game api played transport")?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        // Rejected runs come back as `{error}` with a non-2xx status.
        match serde_json::from_str::<PlayedOutcome>(&text) {
            Ok(outcome) => {
                debug!(score, ?outcome, "run reported");
                Ok(outcome)
            }
            Err(err) if status.is_success() => {
                Err(err).context("game api played parse")
            }
            Err(_) => anyhow::bail!("game api played HTTP {status}: {text}"),
        }
    }

    pub async fn purchases(&self, auth: &str) -> Result<Vec<Purchase>> {
        let url = format!("{}/purchases", self.endpoint);
        let response = self
            .http
            .get(&url)
            .query(&[("auth", auth)])
            .send()
            .await
            .context("game api purchases transport")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("game api purchases HTTP {status}: {text}");
        }

        let body: PurchasesResponse = response
            .json()
            .await
            .context("game api purchases parse")?;
        if !body.ok {
            warn!("game api refused the purchases lookup");
            anyhow::bail!("game api purchases lookup was unsuccessful");
        }
        Ok(body.purchases)
    }
}
