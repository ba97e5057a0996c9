use axum::{Json, extract::State};
use serde::Deserialize;
use tracing::error;

use crate::{
    app_state::AppState,
    cards::{LookupKey, pure},
    error::{CardError, CardResult},
    gateway::{OrderRequest, PaymentOrder, random_receipt},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    /// Major currency units (rupees)
    amount: i64,
    #[serde(default)]
    recharge_number: Option<String>,
}

/// POST /create-order
/// Creates a gateway order for a top-up. When a recharge number is given the
/// card must exist and be able to take the amount.
pub async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> CardResult<Json<PaymentOrder>> {
    if req.amount <= 0 {
        return Err(CardError::Validation("Amount must be positive".to_string()));
    }
    let amount_minor = req
        .amount
        .checked_mul(100)
        .ok_or_else(|| CardError::Validation("Amount is too large".to_string()))?;

    let recharge_number = req
        .recharge_number
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    if let Some(number) = &recharge_number {
        let card = state
            .resolver
            .resolve(&LookupKey::RechargeNumber(number.clone()))
            .await?;
        pure::recharge(&card, req.amount, state.cards.policy())?;
    }

    let request = OrderRequest {
        amount: amount_minor,
        currency: state.config.currency.clone(),
        receipt: recharge_number.clone().unwrap_or_else(random_receipt),
        recharge_number,
    };

    let order = state.gateway.create_order(&request).await.map_err(|e| {
        error!(error = %e, receipt = %request.receipt, "Error creating order");
        CardError::Gateway(e.to_string())
    })?;

    Ok(Json(order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::KvStore,
        gateway::PaymentGateway,
        handlers::test_support::{post_json, seeded_app, seeded_app_with},
    };
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::Arc;

    struct FailingGateway;

    #[async_trait::async_trait]
    impl PaymentGateway for FailingGateway {
        async fn create_order(&self, _request: &OrderRequest) -> anyhow::Result<PaymentOrder> {
            Err(anyhow::anyhow!("Authentication failed"))
        }
    }

    #[tokio::test]
    async fn test_gateway_failure_is_500_with_message() {
        let (app, _) = seeded_app_with(&[], Arc::new(FailingGateway)).await;

        let (status, body) = post_json(&app, "/create-order", json!({"amount": 50})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "GatewayError");
        assert_eq!(body["message"], "Gateway error: Authentication failed");
    }

    #[tokio::test]
    async fn test_create_order_for_recharge_number() {
        let (app, _) = seeded_app(&[]).await;

        let (status, body) = post_json(
            &app,
            "/create-order",
            json!({"amount": 50, "rechargeNumber": "R-77"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["id"].as_str().unwrap().starts_with("order_"));
        assert_eq!(body["amount"], 5000);
        assert_eq!(body["currency"], "INR");
        assert_eq!(body["receipt"], "R-77");
    }

    #[tokio::test]
    async fn test_create_order_without_recharge_number() {
        let (app, _) = seeded_app(&[]).await;

        let (status, body) = post_json(&app, "/api/razorpay-order", json!({"amount": 20})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["amount"], 2000);
        assert!(body["receipt"].as_str().unwrap().starts_with("rcpt_"));
    }

    #[tokio::test]
    async fn test_create_order_rejections() {
        let (app, store) = seeded_app(&[]).await;

        let (status, body) = post_json(&app, "/create-order", json!({"amount": 0})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "ValidationError");

        let (status, body) = post_json(
            &app,
            "/create-order",
            json!({"amount": 401, "rechargeNumber": "R-77"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BalanceExceeded");

        let (status, _) = post_json(
            &app,
            "/create-order",
            json!({"amount": 10, "rechargeNumber": "R-404"}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let mut patch = serde_json::Map::new();
        patch.insert("status".into(), json!("Blocked"));
        store.update("/addedCards/c1", patch).await.unwrap();
        let (status, body) = post_json(
            &app,
            "/create-order",
            json!({"amount": 10, "rechargeNumber": "R-77"}),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "CardBlocked");
    }
}
