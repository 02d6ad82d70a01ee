use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const CREATE_LEDGER_SQL: &str = "CREATE TABLE IF NOT EXISTS migration_ledger (
    migration_id TEXT PRIMARY KEY,
    applied_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
)";

pub const SELECT_LEDGER_SQL: &str =
    "SELECT migration_id, applied_at FROM migration_ledger ORDER BY migration_id";

pub const INSERT_LEDGER_SQL: &str = "INSERT INTO migration_ledger (migration_id) VALUES ($1)";

/// One applied migration unit in a database's ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub migration_id: String,
    pub applied_at: DateTime<Utc>,
}
