use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use wl_api_types::locale::{Language, Locale, locale};
use wl_api_types::{
    ErrorResponse, WalletConnectRequest, WalletConnectResponse, WalletRestoreResponse,
    WalletStatusResponse,
};
use wl_bridge::{Bridge, LoopbackBridge};
use wl_bridge_http::HttpBridge;
use wl_connector::{ConnectError, Connector};
use wl_game_api::GameApiClient;
use wl_payload::display_address;
use wl_storage::{InMemoryStore, KeyValueStore};

mod config;
mod game;
mod presenter;
mod shop;

use config::{BridgeMode, GatewayConfig};
use presenter::Presenter;
use shop::ShopCatalog;

#[derive(Debug, Serialize)]
struct HealthResponse {
    service: &'static str,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
struct LanguageQuery {
    lang: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

struct AppState {
    connector: Connector,
    presenter: Presenter,
    shop: ShopCatalog,
    game: GameApiClient,
}

impl AppState {
    fn new(connector: Connector, config: &GatewayConfig, game: GameApiClient) -> Self {
        Self {
            presenter: Presenter::attach(&connector),
            connector,
            shop: ShopCatalog {
                recipient: config.token_recipient.clone(),
                prices: config.shop_prices.clone(),
                tx_ttl_seconds: config.tx_ttl_seconds,
            },
            game,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = GatewayConfig::from_env()?;
    let state = build_state(&config, GameApiClient::default())?;

    match state.connector.restore_connection().await {
        Some(session) => info!(address = %session.address(), "wallet session restored"),
        None => info!("no wallet session to restore"),
    }

    let app = router(state);
    info!("wallet-gateway listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
    }
}

/// Creates the process's one connector and hands it to every collaborator.
fn build_state(config: &GatewayConfig, game: GameApiClient) -> anyhow::Result<Arc<AppState>> {
    let connector = Connector::new(
        config.connector_config(),
        build_bridge(config),
        open_store(config)?,
    );
    Ok(Arc::new(AppState::new(connector, config, game)))
}

fn build_bridge(config: &GatewayConfig) -> Arc<dyn Bridge> {
    match (config.bridge_mode, config.loopback_wallet.as_deref()) {
        (BridgeMode::Http, _) => Arc::new(HttpBridge::new()),
        (BridgeMode::Loopback, Some(address)) => {
            info!(%address, "using loopback bridge with auto-approving wallet");
            Arc::new(LoopbackBridge::with_auto_wallet(address, "loopback"))
        }
        (BridgeMode::Loopback, None) => {
            warn!("using loopback bridge without WL_LOOPBACK_WALLET; connects will never complete");
            Arc::new(LoopbackBridge::new())
        }
    }
}

#[cfg(feature = "rocksdb")]
fn open_store(config: &GatewayConfig) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    match config.storage_path.as_deref() {
        Some(path) => Ok(Arc::new(wl_storage::RocksDbStore::open_default(path)?)),
        None => Ok(Arc::new(InMemoryStore::default())),
    }
}

#[cfg(not(feature = "rocksdb"))]
fn open_store(config: &GatewayConfig) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    if config.storage_path.is_some() {
        warn!("WL_STORAGE_PATH is set but rocksdb support is not compiled in; sessions will not survive restarts");
    }
    Ok(Arc::new(InMemoryStore::default()))
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/wallet/status", get(wallet_status))
        .route("/wallet/connect", post(wallet_connect))
        .route("/wallet/disconnect", post(wallet_disconnect))
        .route("/wallet/restore", post(wallet_restore))
        .route("/shop/buy", post(shop::shop_buy))
        .route("/shop/purchases", get(shop::shop_purchases))
        .route("/game/played", post(game::game_played))
        .route("/locale/{lang}", get(locale_table))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "wallet-gateway",
        status: "ok",
    })
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        service: "wallet-gateway",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn wallet_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LanguageQuery>,
) -> Json<WalletStatusResponse> {
    let language = query
        .lang
        .as_deref()
        .map(Language::parse)
        .unwrap_or_default();
    let session = state.connector.session();

    Json(WalletStatusResponse {
        connected: session.is_some(),
        wallet_address: session.as_ref().map(|s| s.address().to_owned()),
        friendly_address: session.as_ref().map(|s| display_address(s.address())),
        connected_at_epoch_ms: session.as_ref().map(|s| s.connected_at_epoch_ms),
        game_unlocked: state.presenter.game_unlocked(),
        button: state.presenter.button(language),
    })
}

async fn wallet_connect(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WalletConnectRequest>,
) -> ApiResult<WalletConnectResponse> {
    let platform = request.platform.unwrap_or_default();
    let url = state
        .connector
        .connect_with_hint(&platform)
        .await
        .map_err(connect_error)?;
    Ok(Json(WalletConnectResponse { url }))
}

async fn wallet_disconnect(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.connector.disconnect().await.map_err(connect_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn wallet_restore(State(state): State<Arc<AppState>>) -> Json<WalletRestoreResponse> {
    Json(WalletRestoreResponse {
        session: state.connector.restore_connection().await,
    })
}

async fn locale_table(Path(lang): Path<String>) -> Json<&'static Locale> {
    Json(locale(Language::parse(&lang)))
}

fn error(status: StatusCode, message: String) -> ApiError {
    (status, Json(ErrorResponse { error: message }))
}

fn bad_request(message: &str) -> ApiError {
    error(StatusCode::BAD_REQUEST, message.to_owned())
}

fn not_found(message: &str) -> ApiError {
    error(StatusCode::NOT_FOUND, message.to_owned())
}

fn unavailable(message: &str) -> ApiError {
    error(StatusCode::SERVICE_UNAVAILABLE, message.to_owned())
}

fn bad_gateway(err: impl std::fmt::Display) -> ApiError {
    error(StatusCode::BAD_GATEWAY, err.to_string())
}

fn connect_error(err: ConnectError) -> ApiError {
    let status = match &err {
        ConnectError::AlreadyConnected => StatusCode::CONFLICT,
        ConnectError::NoSession => StatusCode::UNAUTHORIZED,
        ConnectError::Expired { .. } => StatusCode::GONE,
        ConnectError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
        ConnectError::UserRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ConnectError::Remote { .. } | ConnectError::Disconnected => StatusCode::BAD_GATEWAY,
    };
    error(status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;
    use wl_connector::ConnectorConfig;

    const WALLET: &str = "0:83dfd552e63729b472fcbcc8c45ebcc6691702558b68ec7527e1ba403a0f31a8";
    const RECIPIENT: &str = "0:1111111111111111111111111111111111111111111111111111111111111111";
    const JETTON_WALLET: &str = "0:3333333333333333333333333333333333333333333333333333333333333333";

    fn test_state(bridge: LoopbackBridge) -> Arc<AppState> {
        let config = GatewayConfig {
            token_recipient: Some(RECIPIENT.to_owned()),
            shop_prices: vec![0, 150],
            ..GatewayConfig::from_lookup(|_| None).expect("default config")
        };
        let connector = Connector::new(
            ConnectorConfig::default(),
            Arc::new(bridge),
            Arc::new(InMemoryStore::default()),
        );
        Arc::new(AppState::new(
            connector,
            &config,
            GameApiClient::new(Some("http://127.0.0.1:9".to_owned())),
        ))
    }

    async fn call(state: &Arc<AppState>, method: &str, uri: &str, body: Option<Value>) -> anyhow::Result<(StatusCode, Value)> {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
            None => request.body(Body::empty())?,
        };

        let response = router(state.clone()).oneshot(request).await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, value))
    }

    async fn wait_connected(state: &Arc<AppState>) {
        for _ in 0..200 {
            if state.connector.is_connected() && state.presenter.game_unlocked() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("wallet never connected");
    }

    #[tokio::test]
    async fn collaborators_share_the_injected_connector() -> anyhow::Result<()> {
        let config = GatewayConfig {
            bridge_mode: BridgeMode::Loopback,
            loopback_wallet: Some(WALLET.to_owned()),
            ..GatewayConfig::from_lookup(|_| None)?
        };
        let state = build_state(&config, GameApiClient::new(Some("http://127.0.0.1:9".to_owned())))?;
        assert!(!state.presenter.game_unlocked());

        let (status, _) = call(&state, "POST", "/wallet/connect", Some(json!({}))).await?;
        assert_eq!(status, StatusCode::OK);
        wait_connected(&state).await;

        assert_eq!(state.presenter.session(), state.connector.session());
        let (_, body) = call(&state, "GET", "/wallet/status", None).await?;
        assert_eq!(body["connected"], true);
        Ok(())
    }

    #[tokio::test]
    async fn health_and_locale() -> anyhow::Result<()> {
        let state = test_state(LoopbackBridge::new());

        let (status, body) = call(&state, "GET", "/health", None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = call(&state, "GET", "/locale/ru", None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["disconnect_wallet"], "Отключить");

        let (_, body) = call(&state, "GET", "/locale/xx", None).await?;
        assert_eq!(body["connect_wallet"], "Connect Wallet");
        Ok(())
    }

    #[tokio::test]
    async fn connect_flow_updates_status() -> anyhow::Result<()> {
        let state = test_state(LoopbackBridge::with_auto_wallet(WALLET, "pk"));

        let (_, body) = call(&state, "GET", "/wallet/status", None).await?;
        assert_eq!(body["connected"], false);
        assert_eq!(body["button"]["label"], "Connect Wallet");

        let (status, body) = call(&state, "POST", "/wallet/connect", Some(json!({}))).await?;
        assert_eq!(status, StatusCode::OK);
        assert!(body["url"].as_str().is_some_and(|url| url.contains("t.me/wallet")));
        wait_connected(&state).await;

        let (status, _) = call(
            &state,
            "POST",
            "/wallet/connect",
            Some(json!({ "platform": { "kind": "tonkeeper" } })),
        )
        .await?;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = call(&state, "GET", "/wallet/status?lang=en", None).await?;
        assert_eq!(body["connected"], true);
        assert_eq!(body["wallet_address"], WALLET);
        assert!(body["friendly_address"].as_str().is_some_and(|a| a.starts_with("UQ")));
        assert_eq!(body["game_unlocked"], true);

        let (status, _) = call(&state, "POST", "/wallet/disconnect", None).await?;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = call(&state, "GET", "/wallet/status", None).await?;
        assert_eq!(body["connected"], false);
        assert_eq!(body["game_unlocked"], true);
        Ok(())
    }

    #[tokio::test]
    async fn shop_buy_requires_session() -> anyhow::Result<()> {
        let state = test_state(LoopbackBridge::new());
        let (status, body) = call(
            &state,
            "POST",
            "/shop/buy",
            Some(json!({ "item_id": 1, "telegram_user_id": 42, "jetton_wallet": JETTON_WALLET })),
        )
        .await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "no wallet session is connected");
        Ok(())
    }

    #[tokio::test]
    async fn shop_buy_returns_wallet_receipt() -> anyhow::Result<()> {
        let state = test_state(LoopbackBridge::with_auto_wallet(WALLET, "pk"));
        call(&state, "POST", "/wallet/connect", Some(json!({}))).await?;
        wait_connected(&state).await;

        let (status, body) = call(
            &state,
            "POST",
            "/shop/buy",
            Some(json!({ "item_id": 1, "telegram_user_id": 42, "jetton_wallet": JETTON_WALLET })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["price"], 150);
        assert!(body["receipt"]["boc"]
            .as_str()
            .is_some_and(|boc| boc.starts_with("loopback-receipt:")));

        let (status, _) = call(
            &state,
            "POST",
            "/shop/buy",
            Some(json!({ "item_id": 7, "telegram_user_id": 42, "jetton_wallet": JETTON_WALLET })),
        )
        .await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn game_played_validates_input() -> anyhow::Result<()> {
        let state = test_state(LoopbackBridge::new());
        let (status, _) = call(
            &state,
            "POST",
            "/game/played",
            Some(json!({ "tg_data": " ", "score": 3 })),
        )
        .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[test]
    fn connect_errors_map_to_statuses() {
        let cases = [
            (ConnectError::AlreadyConnected, StatusCode::CONFLICT),
            (ConnectError::NoSession, StatusCode::UNAUTHORIZED),
            (
                ConnectError::Expired {
                    valid_until: 1,
                    now: 2,
                },
                StatusCode::GONE,
            ),
            (
                ConnectError::Timeout {
                    request_id: "r".to_owned(),
                },
                StatusCode::REQUEST_TIMEOUT,
            ),
            (
                ConnectError::UserRejected {
                    message: "no".to_owned(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (ConnectError::Disconnected, StatusCode::BAD_GATEWAY),
        ];
        for (err, expected) in cases {
            assert_eq!(connect_error(err).0, expected);
        }
    }
}
