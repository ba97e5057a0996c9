use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    app_state::AppState,
    cards::{LookupKey, Workflow},
    db::models::CardView,
    error::{CardError, CardResult},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupParams {
    #[serde(default)]
    enrollment_number: Option<String>,
    #[serde(default)]
    recharge_number: Option<String>,
}

impl LookupParams {
    pub fn key(&self) -> CardResult<LookupKey> {
        let non_blank = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        match (
            non_blank(&self.enrollment_number),
            non_blank(&self.recharge_number),
        ) {
            (Some(enrollment), None) => Ok(LookupKey::Enrollment(enrollment)),
            (None, Some(recharge)) => Ok(LookupKey::RechargeNumber(recharge)),
            (Some(_), Some(_)) => Err(CardError::Validation(
                "Provide either an enrollment number or a recharge number, not both".to_string(),
            )),
            (None, None) => Err(CardError::Validation(
                "Please enter an enrollment or recharge number".to_string(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub found: bool,
    pub step: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    #[serde(flatten)]
    lookup: LookupParams,
    name: String,
}

#[derive(Debug, Deserialize)]
pub struct RechargeRequest {
    #[serde(flatten)]
    lookup: LookupParams,
    name: String,
    amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct ToggleStatusRequest {
    #[serde(flatten)]
    lookup: LookupParams,
    name: String,
    otp: String,
}

/// Run lookup and name confirmation in one go.
async fn authorize(state: &AppState, lookup: &LookupParams, name: &str) -> CardResult<Workflow> {
    let key = lookup.key()?;
    let confirming = Workflow::default().lookup(&state.resolver, &key).await?;
    confirming.confirm_name(name).inspect_err(|e| {
        if matches!(e, CardError::Validation(_)) {
            warn!(%key, "identity confirmation failed");
        }
    })
}

fn view(state: &AppState, workflow: &Workflow) -> CardResult<Json<CardView>> {
    let card = workflow.authorized_card()?;
    Ok(Json(CardView::new(card, state.config.balance_cap)))
}

/// POST /api/cards/lookup
/// Checks that the key resolves to a card; the holder's name is not revealed
pub async fn lookup(
    State(state): State<AppState>,
    Json(params): Json<LookupParams>,
) -> CardResult<Json<LookupResponse>> {
    let key = params.key()?;
    let workflow = Workflow::default().lookup(&state.resolver, &key).await?;

    Ok(Json(LookupResponse {
        found: true,
        step: workflow.step(),
    }))
}

/// POST /api/cards/confirm
pub async fn confirm(
    State(state): State<AppState>,
    Json(req): Json<ConfirmRequest>,
) -> CardResult<Json<CardView>> {
    let workflow = authorize(&state, &req.lookup, &req.name).await?;
    view(&state, &workflow)
}

/// POST /api/cards/recharge
/// Direct balance top-up, only when enabled in config
pub async fn recharge(
    State(state): State<AppState>,
    Json(req): Json<RechargeRequest>,
) -> CardResult<Json<CardView>> {
    if !state.config.direct_recharge {
        return Err(CardError::DirectRechargeDisabled);
    }

    let workflow = authorize(&state, &req.lookup, &req.name).await?;
    let card_id = workflow.authorized_card()?.card_id.clone();
    let updated = state.cards.recharge(&card_id, req.amount).await?;

    view(&state, &workflow.with_card(updated)?)
}

/// POST /api/cards/toggle-status
/// Block or unblock the card with a one-time code
pub async fn toggle_status(
    State(state): State<AppState>,
    Json(req): Json<ToggleStatusRequest>,
) -> CardResult<Json<CardView>> {
    let workflow = authorize(&state, &req.lookup, &req.name).await?;
    let card_id = workflow.authorized_card()?.card_id.clone();
    let updated = state.cards.toggle_status(&card_id, &req.otp).await?;

    view(&state, &workflow.with_card(updated)?)
}
