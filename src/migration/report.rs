use serde::Serialize;

use crate::migration::connection::StatementError;

/// A statement failure that was tolerated as "already applied"
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IgnoredStatement {
    pub migration_id: String,
    pub statement_index: usize,
    pub code: Option<String>,
    pub message: String,
}

/// The unit that stopped a database's run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUnit {
    pub migration_id: String,
    /// `None` when the failure happened outside a statement (begin, ledger insert, commit)
    pub statement_index: Option<usize>,
    pub error: StatementError,
}

/// Outcome of applying a catalog to one database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
    /// Units never attempted because an earlier unit failed
    pub pending: Vec<String>,
    pub ignored: Vec<IgnoredStatement>,
    pub failed: Option<FailedUnit>,
}

impl MigrationReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }

    pub fn failure_message(&self) -> Option<String> {
        self.failed
            .as_ref()
            .map(|f| match f.statement_index {
                Some(idx) => format!("{} (statement {}): {}", f.migration_id, idx + 1, f.error),
                None => format!("{}: {}", f.migration_id, f.error),
            })
    }
}
