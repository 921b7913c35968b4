use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use wl_api_types::{Purchase, ShopBuyRequest, ShopBuyResponse, TransactionRequest};
use wl_bridge::epoch_seconds;
use wl_payload::{Address, PayloadError, ShopPurchase};

use crate::{ApiResult, AppState, bad_gateway, bad_request, connect_error, not_found, unavailable};

#[derive(Debug, Error, PartialEq)]
pub(crate) enum ShopError {
    #[error("shop recipient is not configured")]
    NotConfigured,
    #[error("unknown shop item {0}")]
    UnknownItem(u32),
    #[error("{field} is not a valid address: {source}")]
    InvalidAddress {
        field: &'static str,
        source: PayloadError,
    },
    #[error("could not build transfer payload: {0}")]
    Payload(#[from] PayloadError),
}

/// Prices and payee of the in-game shop.
#[derive(Debug, Clone)]
pub(crate) struct ShopCatalog {
    pub recipient: Option<String>,
    pub prices: Vec<u64>,
    pub tx_ttl_seconds: u64,
}

impl ShopCatalog {
    pub fn price(&self, item_id: u32) -> Option<u64> {
        self.prices.get(item_id as usize).copied()
    }

    /// Builds the jetton transfer for `request`, paid by `buyer`, valid for
    /// the configured TTL from `now`.
    pub fn transaction(
        &self,
        buyer: &str,
        request: &ShopBuyRequest,
        query_id: u64,
        now: u64,
    ) -> Result<(u64, TransactionRequest), ShopError> {
        let recipient = self.recipient.as_deref().ok_or(ShopError::NotConfigured)?;
        let price = self
            .price(request.item_id)
            .ok_or(ShopError::UnknownItem(request.item_id))?;

        let parse = |field: &'static str, value: &str| {
            Address::parse(value).map_err(|source| ShopError::InvalidAddress { field, source })
        };
        let purchase = ShopPurchase {
            item_id: request.item_id,
            telegram_user_id: request.telegram_user_id,
            price: price.into(),
            recipient: parse("recipient", recipient)?,
            buyer: parse("wallet", buyer)?,
            query_id,
        };
        let jetton_wallet = parse("jetton_wallet", &request.jetton_wallet)?;

        Ok((
            price,
            TransactionRequest {
                valid_until: now + self.tx_ttl_seconds,
                network: None,
                from: None,
                messages: vec![purchase.to_message(&jetton_wallet)?],
            },
        ))
    }
}

pub(crate) async fn shop_buy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ShopBuyRequest>,
) -> ApiResult<ShopBuyResponse> {
    if request.jetton_wallet.trim().is_empty() {
        return Err(bad_request("jetton_wallet is required"));
    }

    let buyer = state
        .connector
        .wallet_address()
        .ok_or_else(|| connect_error(wl_connector::ConnectError::NoSession))?;

    let (price, transaction) = state
        .shop
        .transaction(&buyer, &request, rand::random(), epoch_seconds())
        .map_err(|err| match err {
            ShopError::NotConfigured => unavailable(&err.to_string()),
            ShopError::UnknownItem(_) => not_found(&err.to_string()),
            _ => bad_request(&err.to_string()),
        })?;

    let receipt = state
        .connector
        .send_transaction(transaction)
        .await
        .map_err(connect_error)?;
    info!(item_id = request.item_id, price, "shop purchase confirmed by wallet");

    Ok(Json(ShopBuyResponse {
        item_id: request.item_id,
        price,
        receipt,
    }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct PurchasesQuery {
    auth: String,
}

pub(crate) async fn shop_purchases(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PurchasesQuery>,
) -> ApiResult<Vec<Purchase>> {
    if query.auth.trim().is_empty() {
        return Err(bad_request("auth is required"));
    }

    let purchases = state
        .game
        .purchases(&query.auth)
        .await
        .map_err(bad_gateway)?;
    Ok(Json(purchases))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPIENT: &str = "0:1111111111111111111111111111111111111111111111111111111111111111";
    const BUYER: &str = "0:2222222222222222222222222222222222222222222222222222222222222222";
    const JETTON_WALLET: &str = "0:3333333333333333333333333333333333333333333333333333333333333333";

    fn catalog() -> ShopCatalog {
        ShopCatalog {
            recipient: Some(RECIPIENT.to_owned()),
            prices: vec![0, 150, 300],
            tx_ttl_seconds: 3600,
        }
    }

    fn request(item_id: u32) -> ShopBuyRequest {
        ShopBuyRequest {
            item_id,
            telegram_user_id: 42,
            jetton_wallet: JETTON_WALLET.to_owned(),
        }
    }

    #[test]
    fn purchase_targets_buyer_jetton_wallet() {
        let (price, transaction) = catalog()
            .transaction(BUYER, &request(2), 7, 1_700_000_000)
            .unwrap();

        assert_eq!(price, 300);
        assert_eq!(transaction.valid_until, 1_700_003_600);
        assert_eq!(transaction.messages.len(), 1);
        let message = &transaction.messages[0];
        assert_eq!(message.address, JETTON_WALLET);
        assert_eq!(message.amount, "50000000");
        assert!(message.payload.as_deref().is_some_and(|boc| boc.starts_with("te6c")));
    }

    #[test]
    fn catalog_errors() {
        assert_eq!(
            catalog().transaction(BUYER, &request(9), 0, 0).err(),
            Some(ShopError::UnknownItem(9))
        );

        let unconfigured = ShopCatalog {
            recipient: None,
            ..catalog()
        };
        assert_eq!(
            unconfigured.transaction(BUYER, &request(1), 0, 0).err(),
            Some(ShopError::NotConfigured)
        );

        assert!(matches!(
            catalog().transaction("0:abc...123", &request(1), 0, 0),
            Err(ShopError::InvalidAddress { field: "wallet", .. })
        ));
    }
}
