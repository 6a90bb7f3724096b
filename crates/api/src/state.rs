//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use daybook_billing::BillingService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(pool: PgPool, billing: BillingService) -> Self {
        Self {
            pool,
            billing: Arc::new(billing),
        }
    }
}
