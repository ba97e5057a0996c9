use anyhow::anyhow;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;

use crate::{
    cards::read_card,
    db::{
        KvStore, paths,
        models::{Card, EnrollmentRecord, RechargeIndexRecord},
    },
    error::{CardError, CardResult},
};

/// User-supplied key identifying a card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupKey {
    Enrollment(String),
    RechargeNumber(String),
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupKey::Enrollment(n) => write!(f, "enrollment {}", n),
            LookupKey::RechargeNumber(n) => write!(f, "recharge number {}", n),
        }
    }
}

/// Maps enrollment and recharge numbers to card records. Read-only.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn KvStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn card_id_for(&self, key: &LookupKey) -> CardResult<String> {
        match key {
            LookupKey::Enrollment(number) => {
                let record: EnrollmentRecord = self
                    .read_index(&paths::enrollment(number)?)
                    .await?
                    .ok_or_else(|| CardError::NotFound("Enrollment not found".to_string()))?;
                Ok(record.card_id)
            }
            LookupKey::RechargeNumber(number) => {
                let record: RechargeIndexRecord = self
                    .read_index(&paths::recharge_index(number)?)
                    .await?
                    .ok_or_else(|| CardError::NotFound("Invalid Recharge Number".to_string()))?;
                Ok(record.card_id)
            }
        }
    }

    /// Resolve a lookup key to its card. Misses on either the index or the
    /// card record are `NotFound`.
    pub async fn resolve(&self, key: &LookupKey) -> CardResult<Card> {
        let card_id = self.card_id_for(key).await?;
        let (card, _) = read_card(self.store.as_ref(), &card_id)
            .await?
            .ok_or_else(|| CardError::NotFound("Card data not found".to_string()))?;

        tracing::debug!(%key, card_id = %card.card_id, "resolved card");
        Ok(card)
    }

    async fn read_index<T: DeserializeOwned>(&self, path: &str) -> CardResult<Option<T>> {
        let Some(entry) = self.store.get(path).await? else {
            return Ok(None);
        };
        serde_json::from_value(entry.value)
            .map(Some)
            .map_err(|e| CardError::Store(anyhow!("malformed index record at {}: {}", path, e)))
    }
}
