use axum::{Json, extract::State};
use std::sync::Arc;
use wl_api_types::{GamePlayedRequest, PlayedOutcome};

use crate::{ApiResult, AppState, bad_gateway, bad_request};

/// Forwards a finished run to the game backend, tagged with the connected
/// wallet address when there is one.
pub(crate) async fn game_played(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GamePlayedRequest>,
) -> ApiResult<PlayedOutcome> {
    if request.tg_data.trim().is_empty() {
        return Err(bad_request("tg_data is required"));
    }

    let wallet = state.connector.wallet_address();
    let outcome = state
        .game
        .report_played(&request.tg_data, wallet.as_deref(), request.score)
        .await
        .map_err(bad_gateway)?;
    Ok(Json(outcome))
}
