use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use super::{OrderRequest, PaymentGateway, PaymentOrder};

pub struct RazorpayGateway {
    client: Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    payment_capture: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<OrderNotes<'a>>,
}

/// Echoed back on the captured payment, which is how the webhook finds the card.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderNotes<'a> {
    recharge_number: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: Option<String>,
    description: Option<String>,
}

impl RazorpayGateway {
    pub fn new(base_url: &str, key_id: &str, key_secret: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("failed to initialize HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn order_body(request: &OrderRequest) -> CreateOrderBody<'_> {
    CreateOrderBody {
        amount: request.amount,
        currency: &request.currency,
        receipt: &request.receipt,
        payment_capture: 1,
        notes: request
            .recharge_number
            .as_deref()
            .map(|recharge_number| OrderNotes { recharge_number }),
    }
}

/// Best description of a failed gateway call.
fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope {
            error:
                ErrorDetail {
                    description: Some(description),
                    ..
                },
        }) => description,
        Ok(ErrorEnvelope {
            error: ErrorDetail {
                code: Some(code), ..
            },
        }) => format!("HTTP {}: {}", status, code),
        _ => format!("HTTP {}", status),
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    async fn create_order(&self, request: &OrderRequest) -> Result<PaymentOrder> {
        let response = self
            .client
            .post(self.endpoint("/v1/orders"))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&order_body(request))
            .send()
            .await
            .map_err(|e| anyhow!("gateway request failed: {}", e))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let message = error_message(status, &text);
            warn!(status = %status, %message, "order creation rejected by gateway");
            return Err(anyhow!(message));
        }

        let order: PaymentOrder = serde_json::from_str(&text)
            .map_err(|e| anyhow!("invalid gateway JSON response: {}", e))?;
        info!(order_id = %order.id, amount = order.amount, "payment order created");
        Ok(order)
    }
}
