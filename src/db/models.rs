use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CardStatus {
    #[default]
    Active,
    Blocked,
}

impl CardStatus {
    pub fn toggled(self) -> Self {
        match self {
            CardStatus::Active => CardStatus::Blocked,
            CardStatus::Blocked => CardStatus::Active,
        }
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardStatus::Active => write!(f, "Active"),
            CardStatus::Blocked => write!(f, "Blocked"),
        }
    }
}

/// Record at `/addedCards/{cardID}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    #[serde(rename = "cardID", default)]
    pub card_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: CardStatus,
    #[serde(rename = "cashAmount", default)]
    pub cash_amount: i64,
    /// Fields this service does not own, written back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Record at `/enrollments/{enrollmentNumber}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    #[serde(rename = "cardID")]
    pub card_id: String,
    #[serde(default)]
    pub name: String,
}

/// Record at `/recharge/{rechargeNumber}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RechargeIndexRecord {
    #[serde(rename = "cardID")]
    pub card_id: String,
}

/// Captured payment, stored at `/transactions/{paymentId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub payment_id: String,
    pub order_id: String,
    /// Minor currency units, as reported by the gateway.
    pub amount: i64,
    pub captured_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recharge_number: Option<String>,
    #[serde(default)]
    pub credited: bool,
}

/// Card as shown to an authorized user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardView {
    pub card_id: String,
    pub name: String,
    pub status: CardStatus,
    pub cash_amount: i64,
    pub max_recharge: i64,
}

impl CardView {
    pub fn new(card: &Card, cap: i64) -> Self {
        Self {
            card_id: card.card_id.clone(),
            name: card.name.clone(),
            status: card.status,
            cash_amount: card.cash_amount,
            max_recharge: (cap - card.cash_amount).max(0),
        }
    }
}
