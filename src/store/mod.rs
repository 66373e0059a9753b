//! Persistence gateway: a narrow set of operations over `inbound_emails`,
//! `webhook_subscriptions` and `webhook_deliveries`. Everything else in the
//! pipeline talks to Postgres exclusively through this module.

mod deliveries;
mod inbound;
mod subscriptions;

pub use deliveries::DeliveryRow;
pub use deliveries::UndeliveredRow;
pub use inbound::InboundEmailSummary;
pub use inbound::InboundListQuery;
pub use inbound::InboundEmailRow;
pub use inbound::InsertOutcome;
pub use inbound::NewInboundEmail;
pub use subscriptions::SubscriptionRow;

use sqlx::PgPool;

/// Cloneable handle over the connection pool; all queries live in the
/// submodule `impl` blocks.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub fn pool(&self) -> &PgPool { &self.pool }
}

/// Postgres unique-violation (SQLSTATE 23505); dedup relies on catching this
/// rather than racing a pre-check.
pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}
