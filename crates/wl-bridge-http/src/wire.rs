//! Bridge envelopes and the wallet messages carried inside them.
//!
//! Messages travel as base64 JSON. The relay wraps what a wallet sends in a
//! `{from, message}` frame on the event stream.

use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wl_api_types::Receipt;
use wl_bridge::{UNKNOWN_ERROR_CODE, WalletResponse};

#[derive(Debug, Deserialize)]
pub struct RelayFrame {
    pub from: String,
    pub message: String,
}

/// What a wallet told us, decoded from one relay frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletMessage {
    Connect {
        address: String,
        network: String,
        public_key: String,
    },
    ConnectError {
        code: u32,
        message: String,
    },
    Disconnect,
    Response {
        id: String,
        response: WalletResponse,
    },
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    event: Option<String>,
    id: Option<Value>,
    #[serde(default)]
    payload: Value,
    result: Option<Value>,
    error: Option<RawError>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectItemReply {
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    network: String,
    #[serde(default)]
    public_key: String,
}

#[derive(Debug, Deserialize)]
struct ConnectPayload {
    items: Vec<ConnectItemReply>,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: Vec<&'a str>,
    id: &'a str,
}

pub fn decode_frame(data: &str) -> Result<(String, WalletMessage)> {
    let frame: RelayFrame = serde_json::from_str(data).context("decode relay frame")?;
    let bytes = STANDARD
        .decode(frame.message.as_bytes())
        .context("relay message is not base64")?;
    let message = decode_message(&bytes)?;
    Ok((frame.from, message))
}

pub fn decode_message(bytes: &[u8]) -> Result<WalletMessage> {
    let raw: RawMessage = serde_json::from_slice(bytes).context("decode wallet message")?;

    match raw.event.as_deref() {
        Some("connect") => {
            let payload: ConnectPayload =
                serde_json::from_value(raw.payload).context("decode connect payload")?;
            let item = payload
                .items
                .into_iter()
                .find(|item| item.name == "ton_addr")
                .ok_or_else(|| anyhow!("connect event without a ton_addr item"))?;
            Ok(WalletMessage::Connect {
                address: item.address,
                network: item.network,
                public_key: item.public_key,
            })
        }
        Some("connect_error") => {
            let error: RawError =
                serde_json::from_value(raw.payload).context("decode connect error payload")?;
            Ok(WalletMessage::ConnectError {
                code: error.code,
                message: error.message,
            })
        }
        Some("disconnect") => Ok(WalletMessage::Disconnect),
        Some(other) => Err(anyhow!("unsupported wallet event '{other}'")),
        None => {
            let id = match raw.id {
                Some(Value::String(id)) => id,
                Some(Value::Number(id)) => id.to_string(),
                _ => return Err(anyhow!("wallet response without an id")),
            };
            let response = match (raw.result, raw.error) {
                (_, Some(error)) => WalletResponse::from_error(error.code, error.message),
                (Some(Value::String(boc)), None) => WalletResponse::Confirmed(Receipt { boc }),
                (Some(other), None) => WalletResponse::Failed {
                    code: UNKNOWN_ERROR_CODE,
                    message: format!("unexpected result: {other}"),
                },
                (None, None) => return Err(anyhow!("wallet response {id} has neither result nor error")),
            };
            Ok(WalletMessage::Response { id, response })
        }
    }
}

/// Base64 body for `POST /message`.
pub fn encode_request(method: &str, params: &[&str], id: &str) -> Result<String> {
    let json = serde_json::to_vec(&RpcRequest {
        method,
        params: params.to_vec(),
        id,
    })
    .context("encode wallet request")?;
    Ok(STANDARD.encode(json))
}
