use anyhow::anyhow;
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use crate::{
    app_state::AppState,
    cards::{LookupKey, PaymentCredit},
    crypto::verify_webhook_signature,
    db::{Versioned, models::Transaction, paths},
    error::{CardError, CardResult},
};

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";
pub const PAYMENT_CAPTURED: &str = "payment.captured";

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    #[serde(default)]
    payload: Option<EventPayload>,
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    payment: Option<PaymentWrapper>,
}

#[derive(Debug, Deserialize)]
struct PaymentWrapper {
    entity: PaymentEntity,
}

#[derive(Debug, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    /// Minor currency units
    pub amount: i64,
    /// Object when set, empty array when not
    #[serde(default)]
    pub notes: Value,
}

impl PaymentEntity {
    pub fn recharge_number(&self) -> Option<String> {
        self.notes
            .get("rechargeNumber")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Recorded { credited: bool },
    /// Redelivery of a payment whose credit had not gone through yet
    Retried { credited: bool },
    Duplicate,
}

fn respond(status: StatusCode, message: Option<&str>) -> (StatusCode, Json<WebhookResponse>) {
    (
        status,
        Json(WebhookResponse {
            success: status.is_success(),
            message: message.map(str::to_string),
        }),
    )
}

/// POST /webhook
/// Gateway callback. The raw body is authenticated before anything is parsed.
/// Storage failures answer 500 so the gateway delivers the event again.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookResponse>) {
    match accept_webhook(&state, &headers, &body).await {
        Ok(outcome) => {
            debug!(?outcome, "webhook handled");
            respond(StatusCode::OK, None)
        }
        Err(e) => {
            let status = if e.is_retryable() {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                e.status_code()
            };
            respond(status, Some(&e.user_message()))
        }
    }
}

async fn accept_webhook(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> CardResult<Option<CaptureOutcome>> {
    let Some(secret) = state.config.webhook_secret() else {
        error!("webhook secret not configured, rejecting webhook");
        return Err(CardError::InvalidSignature);
    };

    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        warn!("missing webhook signature");
        return Err(CardError::InvalidSignature);
    };

    if !verify_webhook_signature(body, signature, secret) {
        warn!("invalid webhook signature");
        return Err(CardError::InvalidSignature);
    }

    let event: WebhookEvent = serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "invalid webhook payload");
        invalid_payload()
    })?;

    if event.event != PAYMENT_CAPTURED {
        debug!(event = %event.event, "ignoring webhook event");
        return Ok(None);
    }

    let Some(entity) = event.payload.and_then(|p| p.payment).map(|p| p.entity) else {
        warn!("captured payment event without payment entity");
        return Err(invalid_payload());
    };

    process_captured_payment(state, entity)
        .await
        .inspect_err(|e| error!(error = %e, "failed to handle captured payment"))
        .map(Some)
}

fn invalid_payload() -> CardError {
    CardError::Validation("Invalid payload".to_string())
}

/// Record a captured payment once and credit the card it was made for.
///
/// A redelivered payment that is recorded but not yet credited gets its
/// credit retried. The card itself remembers which payments it has taken,
/// so a retry never adds the amount twice.
pub async fn process_captured_payment(
    state: &AppState,
    entity: PaymentEntity,
) -> CardResult<CaptureOutcome> {
    let path = paths::transaction(&entity.id)?;
    let transaction = Transaction {
        recharge_number: entity.recharge_number(),
        payment_id: entity.id,
        order_id: entity.order_id.unwrap_or_default(),
        amount: entity.amount,
        captured_at: Utc::now(),
        credited: false,
    };
    let value = serde_json::to_value(&transaction).map_err(|e| CardError::Store(e.into()))?;

    if state.store.compare_and_set(&path, None, value).await? {
        info!(
            payment_id = %transaction.payment_id,
            order_id = %transaction.order_id,
            amount = transaction.amount,
            "captured payment recorded"
        );
        let credited = settle(state, &path, &transaction).await?;
        return Ok(CaptureOutcome::Recorded { credited });
    }

    let recorded = load_transaction(state, &path).await?;
    if recorded.credited || recorded.recharge_number.is_none() {
        info!(payment_id = %recorded.payment_id, "payment already recorded");
        return Ok(CaptureOutcome::Duplicate);
    }

    info!(payment_id = %recorded.payment_id, "retrying credit for recorded payment");
    let credited = settle(state, &path, &recorded).await?;
    Ok(CaptureOutcome::Retried { credited })
}

async fn load_transaction(state: &AppState, path: &str) -> CardResult<Transaction> {
    let Some(Versioned { value, .. }) = state.store.get(path).await? else {
        return Err(CardError::Store(anyhow!("transaction at {} disappeared", path)));
    };
    serde_json::from_value(value)
        .map_err(|e| CardError::Store(anyhow!("malformed transaction at {}: {}", path, e)))
}

/// Credit the card and flag the transaction. A refusal by the card's own
/// rules leaves the transaction uncredited for reconciliation; transient
/// failures are returned.
async fn settle(state: &AppState, path: &str, transaction: &Transaction) -> CardResult<bool> {
    let Some(recharge_number) = &transaction.recharge_number else {
        return Ok(false);
    };

    match credit_card(state, recharge_number, transaction).await {
        Ok(()) => {}
        Err(e) if e.is_retryable() => return Err(e),
        Err(e) => {
            warn!(
                payment_id = %transaction.payment_id,
                %recharge_number,
                error = %e,
                "captured payment not credited, needs reconciliation"
            );
            return Ok(false);
        }
    }

    let mut patch = Map::new();
    patch.insert("credited".to_string(), json!(true));
    state.store.update(path, patch).await?;
    Ok(true)
}

async fn credit_card(
    state: &AppState,
    recharge_number: &str,
    transaction: &Transaction,
) -> CardResult<()> {
    if transaction.amount % 100 != 0 {
        return Err(CardError::Validation(format!(
            "amount {} is not a whole number of rupees",
            transaction.amount
        )));
    }
    let card_id = state
        .resolver
        .card_id_for(&LookupKey::RechargeNumber(recharge_number.to_string()))
        .await?;

    let credit = state
        .cards
        .credit_payment(&card_id, transaction.amount / 100, &transaction.payment_id)
        .await?;
    if let PaymentCredit::AlreadyApplied(_) = credit {
        info!(payment_id = %transaction.payment_id, "payment was already on the card");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::sign_webhook,
        db::{KvStore, MemoryStore},
        gateway::MockGateway,
        handlers::test_support::{WEBHOOK_SECRET, app, seed, send, seeded_app},
    };
    use async_trait::async_trait;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    /// Memory store whose first matching write fails like a locked database.
    struct FailOnce {
        inner: MemoryStore,
        op: &'static str,
        prefix: &'static str,
        armed: AtomicBool,
    }

    impl FailOnce {
        fn new(op: &'static str, prefix: &'static str) -> Self {
            Self {
                inner: MemoryStore::new(),
                op,
                prefix,
                armed: AtomicBool::new(true),
            }
        }

        fn trip(&self, op: &str, path: &str) -> anyhow::Result<()> {
            let matches = op == self.op && path.starts_with(self.prefix);
            if matches && self.armed.swap(false, Ordering::SeqCst) {
                anyhow::bail!("database is locked");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl KvStore for FailOnce {
        async fn get(&self, path: &str) -> anyhow::Result<Option<Versioned>> {
            self.inner.get(path).await
        }

        async fn set(&self, path: &str, value: Value) -> anyhow::Result<()> {
            self.trip("set", path)?;
            self.inner.set(path, value).await
        }

        async fn update(&self, path: &str, patch: Map<String, Value>) -> anyhow::Result<()> {
            self.trip("update", path)?;
            self.inner.update(path, patch).await
        }

        async fn compare_and_set(
            &self,
            path: &str,
            expected: Option<i64>,
            value: Value,
        ) -> anyhow::Result<bool> {
            self.trip("compare_and_set", path)?;
            self.inner.compare_and_set(path, expected, value).await
        }
    }

    async fn failing_once(
        op: &'static str,
        prefix: &'static str,
    ) -> (axum::Router, Arc<FailOnce>) {
        let store = Arc::new(FailOnce::new(op, prefix));
        seed(store.as_ref()).await;
        (app(store.clone(), &[], Arc::new(MockGateway)), store)
    }

    fn captured(payment_id: &str, amount: i64, notes: Value) -> Vec<u8> {
        json!({
            "entity": "event",
            "event": "payment.captured",
            "payload": {
                "payment": {
                    "entity": {
                        "id": payment_id,
                        "order_id": "order_abc",
                        "amount": amount,
                        "currency": "INR",
                        "status": "captured",
                        "notes": notes
                    }
                }
            }
        })
        .to_string()
        .into_bytes()
    }

    async fn deliver(app: &axum::Router, body: Vec<u8>) -> (StatusCode, Value) {
        let signature = sign_webhook(&body, WEBHOOK_SECRET);
        send(app, "/webhook", body, &[(SIGNATURE_HEADER, signature.as_str())]).await
    }

    #[tokio::test]
    async fn test_captured_payment_is_recorded_once() {
        let (app, store) = seeded_app(&[]).await;
        let body = captured("pay_1", 5000, json!([]));

        let (status, response) = deliver(&app, body.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response, json!({"success": true}));

        let first = store.get("/transactions/pay_1").await.unwrap().unwrap();
        assert_eq!(first.value["paymentId"], "pay_1");
        assert_eq!(first.value["orderId"], "order_abc");
        assert_eq!(first.value["amount"], 5000);
        assert_eq!(first.value["credited"], false);

        // Replay
        let (status, _) = deliver(&app, body).await;
        assert_eq!(status, StatusCode::OK);

        let second = store.get("/transactions/pay_1").await.unwrap().unwrap();
        assert_eq!(second, first);
        assert_eq!(store.count_prefix("/transactions/").await, 1);
    }

    #[tokio::test]
    async fn test_captured_payment_credits_card_once() {
        let (app, store) = seeded_app(&[]).await;
        let body = captured("pay_2", 15000, json!({"rechargeNumber": "R-77"}));

        for _ in 0..3 {
            let (status, _) = deliver(&app, body.clone()).await;
            assert_eq!(status, StatusCode::OK);
        }

        let card = store.get("/addedCards/c1").await.unwrap().unwrap();
        assert_eq!(card.value["cashAmount"], 250);

        let tx = store.get("/transactions/pay_2").await.unwrap().unwrap();
        assert_eq!(tx.value["credited"], true);
        assert_eq!(tx.value["rechargeNumber"], "R-77");
    }

    #[tokio::test]
    async fn test_storage_failure_while_crediting_is_retried_on_redelivery() {
        let (app, store) = failing_once("compare_and_set", "/addedCards/").await;
        let body = captured("pay_5", 5000, json!({"rechargeNumber": "R-77"}));

        let (status, response) = deliver(&app, body.clone()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response["success"], false);
        let card = store.inner.get("/addedCards/c1").await.unwrap().unwrap();
        assert_eq!(card.value["cashAmount"], 100);
        let tx = store.inner.get("/transactions/pay_5").await.unwrap().unwrap();
        assert_eq!(tx.value["credited"], false);

        // Gateway redelivers after the 500
        let (status, _) = deliver(&app, body.clone()).await;
        assert_eq!(status, StatusCode::OK);
        let card = store.inner.get("/addedCards/c1").await.unwrap().unwrap();
        assert_eq!(card.value["cashAmount"], 150);
        let tx = store.inner.get("/transactions/pay_5").await.unwrap().unwrap();
        assert_eq!(tx.value["credited"], true);

        let (status, _) = deliver(&app, body).await;
        assert_eq!(status, StatusCode::OK);
        let card = store.inner.get("/addedCards/c1").await.unwrap().unwrap();
        assert_eq!(card.value["cashAmount"], 150);
    }

    #[tokio::test]
    async fn test_lost_credited_flag_does_not_credit_twice() {
        let (app, store) = failing_once("update", "/transactions/").await;
        let body = captured("pay_6", 5000, json!({"rechargeNumber": "R-77"}));

        // Card credited, flag write fails
        let (status, _) = deliver(&app, body.clone()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let card = store.inner.get("/addedCards/c1").await.unwrap().unwrap();
        assert_eq!(card.value["cashAmount"], 150);

        let (status, _) = deliver(&app, body).await;
        assert_eq!(status, StatusCode::OK);
        let card = store.inner.get("/addedCards/c1").await.unwrap().unwrap();
        assert_eq!(card.value["cashAmount"], 150);
        let tx = store.inner.get("/transactions/pay_6").await.unwrap().unwrap();
        assert_eq!(tx.value["credited"], true);
    }

    #[tokio::test]
    async fn test_missing_webhook_secret_rejects_everything() {
        let store = Arc::new(MemoryStore::new());
        seed(store.as_ref()).await;
        let app = app(
            store.clone(),
            &["--razorpay-webhook-secret", ""],
            Arc::new(MockGateway),
        );
        let body = captured("pay_7", 5000, json!({"rechargeNumber": "R-77"}));

        let (status, response) = deliver(&app, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["message"], "Invalid signature");
        assert_eq!(store.count_prefix("/transactions/").await, 0);
    }

    #[tokio::test]
    async fn test_credit_over_cap_is_recorded_but_not_credited() {
        let (app, store) = seeded_app(&[]).await;
        let body = captured("pay_3", 45000, json!({"rechargeNumber": "R-77"}));

        let (status, _) = deliver(&app, body).await;
        assert_eq!(status, StatusCode::OK);

        let card = store.get("/addedCards/c1").await.unwrap().unwrap();
        assert_eq!(card.value["cashAmount"], 100);
        let tx = store.get("/transactions/pay_3").await.unwrap().unwrap();
        assert_eq!(tx.value["credited"], false);
    }

    #[tokio::test]
    async fn test_bad_signatures_are_rejected() {
        let (app, store) = seeded_app(&[]).await;
        let body = captured("pay_4", 5000, json!([]));
        let signature = sign_webhook(&body, WEBHOOK_SECRET);

        let mut tampered = body.clone();
        tampered[10] ^= 0x01;
        let (status, response) =
            send(&app, "/webhook", tampered, &[(SIGNATURE_HEADER, signature.as_str())]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            response,
            json!({"success": false, "message": "Invalid signature"})
        );

        let (status, _) = send(&app, "/webhook", body.clone(), &[]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let wrong = sign_webhook(&body, "another-secret");
        let (status, _) = send(&app, "/webhook", body, &[(SIGNATURE_HEADER, wrong.as_str())]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(store.count_prefix("/transactions/").await, 0);
    }

    #[tokio::test]
    async fn test_other_events_are_acknowledged_without_writes() {
        let (app, store) = seeded_app(&[]).await;
        let body = json!({"event": "payment.failed", "payload": {}})
            .to_string()
            .into_bytes();

        let (status, response) = deliver(&app, body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["success"], true);
        assert_eq!(store.count_prefix("/transactions/").await, 0);
    }

    #[tokio::test]
    async fn test_signed_garbage_is_bad_request() {
        let (app, _) = seeded_app(&[]).await;
        let (status, response) = deliver(&app, b"not json".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["message"], "Invalid payload");
    }

    #[test]
    fn test_recharge_number_from_notes() {
        let entity = |notes: Value| PaymentEntity {
            id: "pay".into(),
            order_id: None,
            amount: 100,
            notes,
        };
        assert_eq!(
            entity(json!({"rechargeNumber": " R-77 "})).recharge_number(),
            Some("R-77".to_string())
        );
        assert_eq!(entity(json!([])).recharge_number(), None);
        assert_eq!(entity(Value::Null).recharge_number(), None);
    }
}
