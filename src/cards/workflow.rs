use crate::{
    cards::resolver::{IdentityResolver, LookupKey},
    db::models::Card,
    error::{CardError, CardResult},
};

/// Where a user is in the lookup → confirm → act flow.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Workflow {
    #[default]
    AwaitingLookup,
    ConfirmingIdentity { card: Card },
    Authorized { card: Card },
}

impl Workflow {
    pub fn step(&self) -> &'static str {
        match self {
            Workflow::AwaitingLookup => "awaitingLookup",
            Workflow::ConfirmingIdentity { .. } => "confirmingIdentity",
            Workflow::Authorized { .. } => "authorized",
        }
    }

    /// Resolve the key. The read completes before the state moves on.
    pub async fn lookup(self, resolver: &IdentityResolver, key: &LookupKey) -> CardResult<Self> {
        match self {
            Workflow::AwaitingLookup => {
                let card = resolver.resolve(key).await?;
                Ok(Workflow::ConfirmingIdentity { card })
            }
            other => Err(out_of_order("lookup", &other)),
        }
    }

    /// Compare the typed name against the card holder, ignoring case and
    /// surrounding whitespace.
    pub fn confirm_name(self, name: &str) -> CardResult<Self> {
        match self {
            Workflow::ConfirmingIdentity { card } => {
                let typed = name.trim();
                if typed.is_empty() {
                    return Err(CardError::Validation("Please enter your name".to_string()));
                }
                if typed.to_lowercase() != card.name.trim().to_lowercase() {
                    return Err(CardError::Validation("Name does not match".to_string()));
                }
                Ok(Workflow::Authorized { card })
            }
            other => Err(out_of_order("confirm", &other)),
        }
    }

    /// "That's not me": back to the start.
    #[cfg(test)]
    pub fn reset(self) -> Self {
        Workflow::AwaitingLookup
    }

    pub fn authorized_card(&self) -> CardResult<&Card> {
        match self {
            Workflow::Authorized { card } => Ok(card),
            other => Err(out_of_order("operate on card", other)),
        }
    }

    /// Replace the card after a successful mutation.
    pub fn with_card(self, updated: Card) -> CardResult<Self> {
        match self {
            Workflow::Authorized { .. } => Ok(Workflow::Authorized { card: updated }),
            other => Err(out_of_order("update card", &other)),
        }
    }
}

fn out_of_order(action: &str, state: &Workflow) -> CardError {
    CardError::Validation(format!("Cannot {} while {}", action, state.step()))
}
