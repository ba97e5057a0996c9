pub mod pure;
pub mod resolver;
pub mod workflow;

use anyhow::anyhow;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    crypto::totp,
    db::{KvStore, Versioned, models::Card, paths},
    error::{CardError, CardResult},
};

pub use pure::RechargePolicy;
pub use resolver::{IdentityResolver, LookupKey};
pub use workflow::Workflow;

/// Conditional-write attempts before a contended update gives up.
const MAX_CAS_ATTEMPTS: usize = 32;

/// Card field holding the ids of gateway payments already added to the balance.
const CREDITED_PAYMENTS: &str = "creditedPayments";

/// A card as read from the store, with the raw record kept so writes only
/// touch the fields they change.
#[derive(Debug, Clone)]
pub(crate) struct StoredCard {
    pub card: Card,
    pub version: i64,
    raw: serde_json::Map<String, Value>,
}

impl StoredCard {
    fn with_fields<'a>(&self, fields: impl IntoIterator<Item = (&'a str, Value)>) -> Value {
        let mut raw = self.raw.clone();
        for (key, value) in fields {
            raw.insert(key.to_string(), value);
        }
        Value::Object(raw)
    }

    fn has_payment(&self, payment_id: &str) -> bool {
        self.raw
            .get(CREDITED_PAYMENTS)
            .and_then(Value::as_object)
            .is_some_and(|paid| paid.contains_key(payment_id))
    }

    /// New balance plus `payment_id` marked as applied, in one record.
    fn with_payment(&self, cash_amount: i64, payment_id: &str) -> Value {
        let mut paid = self
            .raw
            .get(CREDITED_PAYMENTS)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        paid.insert(payment_id.to_string(), json!(true));
        self.with_fields([
            ("cashAmount", json!(cash_amount)),
            (CREDITED_PAYMENTS, Value::Object(paid)),
        ])
    }
}

/// Result of adding a gateway payment to a card.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentCredit {
    Applied(Card),
    /// The payment id was already on the card; the balance is unchanged.
    AlreadyApplied(Card),
}

pub(crate) async fn read_card(
    store: &dyn KvStore,
    card_id: &str,
) -> CardResult<Option<(Card, i64)>> {
    Ok(read_stored_card(store, card_id)
        .await?
        .map(|stored| (stored.card, stored.version)))
}

async fn read_stored_card(store: &dyn KvStore, card_id: &str) -> CardResult<Option<StoredCard>> {
    let path = paths::card(card_id)?;
    let Some(Versioned { value, version }) = store.get(&path).await? else {
        return Ok(None);
    };
    let Value::Object(raw) = value else {
        return Err(CardError::Store(anyhow!("card record at {} is not an object", path)));
    };

    let mut card: Card = serde_json::from_value(Value::Object(raw.clone()))
        .map_err(|e| CardError::Store(anyhow!("malformed card record at {}: {}", path, e)))?;
    if card.card_id.is_empty() {
        card.card_id = card_id.trim().to_string();
    }

    Ok(Some(StoredCard { card, version, raw }))
}

/// Balance and status mutations, serialized per card through conditional writes.
#[derive(Clone)]
pub struct CardService {
    store: Arc<dyn KvStore>,
    policy: RechargePolicy,
}

impl CardService {
    pub fn new(store: Arc<dyn KvStore>, policy: RechargePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> RechargePolicy {
        self.policy
    }

    async fn load(&self, card_id: &str) -> CardResult<StoredCard> {
        read_stored_card(self.store.as_ref(), card_id)
            .await?
            .ok_or_else(|| CardError::NotFound("Card data not found".to_string()))
    }

    /// Add `delta` to the card balance. The write is conditional on the
    /// version that was read, so concurrent recharges accumulate instead of
    /// overwriting each other and the cap holds.
    pub async fn recharge(&self, card_id: &str, delta: i64) -> CardResult<Card> {
        let path = paths::card(card_id)?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let stored = self.load(card_id).await?;
            let updated = pure::recharge(&stored.card, delta, self.policy)?;
            let value = stored.with_fields([("cashAmount", json!(updated.cash_amount))]);

            if self
                .store
                .compare_and_set(&path, Some(stored.version), value)
                .await?
            {
                info!(
                    card_id = %updated.card_id,
                    old_balance = stored.card.cash_amount,
                    new_balance = updated.cash_amount,
                    "card recharged"
                );
                return Ok(updated);
            }
            debug!(card_id, attempt, "recharge raced with another write, retrying");
        }

        warn!(card_id, "recharge gave up after repeated conflicts");
        Err(CardError::Conflict)
    }

    /// Add a captured gateway payment to the balance at most once.
    ///
    /// The payment id is written into the card record under the same
    /// conditional write as the new balance, so a retried credit for the same
    /// payment finds it and leaves the balance alone.
    pub async fn credit_payment(
        &self,
        card_id: &str,
        delta: i64,
        payment_id: &str,
    ) -> CardResult<PaymentCredit> {
        let path = paths::card(card_id)?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let stored = self.load(card_id).await?;
            if stored.has_payment(payment_id) {
                debug!(card_id, payment_id, "payment already applied to card");
                return Ok(PaymentCredit::AlreadyApplied(stored.card));
            }

            let updated = pure::recharge(&stored.card, delta, self.policy)?;
            let value = stored.with_payment(updated.cash_amount, payment_id);
            if self
                .store
                .compare_and_set(&path, Some(stored.version), value)
                .await?
            {
                info!(
                    card_id = %updated.card_id,
                    payment_id,
                    old_balance = stored.card.cash_amount,
                    new_balance = updated.cash_amount,
                    "payment credited to card"
                );
                return Ok(PaymentCredit::Applied(updated));
            }
            debug!(card_id, attempt, "payment credit raced with another write, retrying");
        }

        warn!(card_id, payment_id, "payment credit gave up after repeated conflicts");
        Err(CardError::Conflict)
    }

    /// Flip Active ↔ Blocked after checking a one-time code.
    pub async fn toggle_status(&self, card_id: &str, otp: &str) -> CardResult<Card> {
        self.toggle_verified(card_id, |secret| totp::verify(secret, otp)).await
    }

    #[cfg(test)]
    pub async fn toggle_status_at(
        &self,
        card_id: &str,
        otp: &str,
        unix_secs: u64,
    ) -> CardResult<Card> {
        self.toggle_verified(card_id, |secret| totp::verify_at(secret, otp, unix_secs)).await
    }

    async fn toggle_verified(
        &self,
        card_id: &str,
        verify: impl FnOnce(&str) -> bool,
    ) -> CardResult<Card> {
        let path = paths::card(card_id)?;
        let mut stored = self.load(card_id).await?;

        let secret = self.totp_secret(card_id).await?;
        if !verify(&secret) {
            warn!(card_id, "status change rejected: invalid OTP");
            return Err(CardError::InvalidOtp);
        }

        let target = stored.card.status.toggled();
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            if stored.card.status == target {
                // A concurrent request already made the same change
                return Ok(stored.card);
            }
            let value = stored.with_fields([("status", json!(target))]);
            if self
                .store
                .compare_and_set(&path, Some(stored.version), value)
                .await?
            {
                info!(card_id, status = %target, "card status changed");
                return Ok(pure::toggle_status(&stored.card));
            }
            debug!(card_id, attempt, "status change raced with another write, retrying");
            stored = self.load(card_id).await?;
        }

        Err(CardError::Conflict)
    }

    async fn totp_secret(&self, card_id: &str) -> CardResult<String> {
        match self.store.get(&paths::totp_secret(card_id)?).await? {
            Some(Versioned {
                value: Value::String(secret),
                ..
            }) if !secret.trim().is_empty() => Ok(secret),
            _ => Err(CardError::NoSecretConfigured),
        }
    }
}
