pub mod razorpay;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use razorpay::RazorpayGateway;

/// Order to be created with the payment gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    /// Minor currency units (paise for INR)
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub recharge_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a remote order the client will pay against.
    async fn create_order(&self, request: &OrderRequest) -> Result<PaymentOrder>;
}

/// Mock implementation for development and testing
pub struct MockGateway;

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_order(&self, request: &OrderRequest) -> Result<PaymentOrder> {
        Ok(PaymentOrder {
            id: format!("order_{}", hex::encode(rand::random::<[u8; 7]>())),
            amount: request.amount,
            currency: request.currency.clone(),
            receipt: request.receipt.clone(),
        })
    }
}

/// Receipt id for orders not tied to a recharge number.
pub fn random_receipt() -> String {
    format!("rcpt_{}", hex::encode(rand::random::<[u8; 8]>()))
}
