use std::sync::Arc;

use crate::{
    cards::{CardService, IdentityResolver, RechargePolicy},
    config::Config,
    db::KvStore,
    gateway::PaymentGateway,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn KvStore>,
    pub config: Arc<Config>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub resolver: IdentityResolver,
    pub cards: CardService,
}

impl AppState {
    pub fn new(
        store: Arc<dyn KvStore>,
        config: Arc<Config>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let policy = RechargePolicy {
            cap: config.balance_cap,
        };
        Self {
            resolver: IdentityResolver::new(store.clone()),
            cards: CardService::new(store.clone(), policy),
            store,
            config,
            gateway,
        }
    }
}
