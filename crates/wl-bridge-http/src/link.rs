//! Universal links handed to the user's wallet app.

use anyhow::{Context, Result};
use serde::Serialize;
use url::Url;
use url::form_urlencoded;
use wl_bridge::ConnectRequest;

pub const PROTOCOL_VERSION: &str = "2";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectItems<'a> {
    manifest_url: &'a str,
    items: [ConnectItem; 1],
}

#[derive(Debug, Serialize)]
struct ConnectItem {
    name: &'static str,
}

/// JSON connect request the wallet reads from the `r` parameter.
pub fn connect_request_json(manifest_url: &str) -> Result<String> {
    serde_json::to_string(&ConnectItems {
        manifest_url,
        items: [ConnectItem { name: "ton_addr" }],
    })
    .context("encode connect request")
}

fn is_telegram_link(link: &Url) -> bool {
    matches!(link.host_str(), Some("t.me") | Some("telegram.me"))
}

/// Telegram only passes `[A-Za-z0-9_-]` through `startattach`.
fn encode_telegram_params(params: &str) -> String {
    params
        .replace('.', "%2E")
        .replace('-', "%2D")
        .replace('_', "%5F")
        .replace('&', "-")
        .replace('=', "__")
        .replace('%', "--")
}

pub fn universal_link(request: &ConnectRequest, client_id: &str) -> Result<String> {
    let base = request.source.universal_link.trim();
    let mut link = Url::parse(base).with_context(|| format!("invalid universal link '{base}'"))?;
    let connect = connect_request_json(&request.manifest_url)?;

    if is_telegram_link(&link) {
        let ret = request
            .twa_return_url
            .as_deref()
            .unwrap_or(request.return_strategy.as_param());
        let params = form_urlencoded::Serializer::new(String::new())
            .append_pair("v", PROTOCOL_VERSION)
            .append_pair("id", client_id)
            .append_pair("r", &connect)
            .append_pair("ret", ret)
            .finish();
        let start = format!("tonconnect-{}", encode_telegram_params(&params));
        link.query_pairs_mut().append_pair("startattach", &start);
        return Ok(link.into());
    }

    link.query_pairs_mut()
        .append_pair("v", PROTOCOL_VERSION)
        .append_pair("id", client_id)
        .append_pair("r", &connect)
        .append_pair("ret", request.return_strategy.as_param());
    Ok(link.into())
}
