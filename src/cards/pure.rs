use crate::{
    db::models::{Card, CardStatus},
    error::{CardError, CardResult},
};

/// Policy knobs for balance changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RechargePolicy {
    pub cap: i64,
}

impl Default for RechargePolicy {
    fn default() -> Self {
        Self { cap: 500 }
    }
}

/// Pure recharge transition: returns the card with `delta` added, or the
/// reason it cannot be applied. Blocked cards are never recharged.
pub fn recharge(card: &Card, delta: i64, policy: RechargePolicy) -> CardResult<Card> {
    if delta <= 0 {
        return Err(CardError::Validation(
            "Recharge amount must be positive".to_string(),
        ));
    }
    if card.status == CardStatus::Blocked {
        return Err(CardError::CardBlocked);
    }

    let remaining = (policy.cap - card.cash_amount).max(0);
    let new_balance = card
        .cash_amount
        .checked_add(delta)
        .filter(|b| *b <= policy.cap);
    let Some(new_balance) = new_balance else {
        return Err(CardError::BalanceExceeded {
            balance: card.cash_amount,
            requested: delta,
            remaining,
            cap: policy.cap,
        });
    };

    Ok(Card {
        cash_amount: new_balance,
        ..card.clone()
    })
}

/// Pure status transition: Active ↔ Blocked.
pub fn toggle_status(card: &Card) -> Card {
    Card {
        status: card.status.toggled(),
        ..card.clone()
    }
}
