use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::database::models::ledger::LedgerEntry;
use crate::database::models::server::ServerCredential;

/// Broad origin of a statement failure. Only `Database` errors carry a
/// backend code and are eligible for the ignorable allowlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementErrorKind {
    Database,
    Connection,
    Timeout,
    Other,
}

/// Failure of a single operation against a schema connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementError {
    pub kind: StatementErrorKind,
    pub code: Option<String>,
    pub message: String,
}

impl StatementError {
    pub fn database(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind: StatementErrorKind::Database,
            code,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: StatementErrorKind::Connection,
            code: None,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: StatementErrorKind::Timeout,
            code: None,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: StatementErrorKind::Other,
            code: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for StatementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.code) {
            (_, Some(code)) => write!(f, "[{}] {}", code, self.message),
            (StatementErrorKind::Timeout, None) => write!(f, "timeout: {}", self.message),
            (StatementErrorKind::Connection, None) => write!(f, "connection: {}", self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for StatementError {}

/// One open connection to a single database, as seen by the migration runner.
///
/// Implementations must guarantee that a failed `execute` inside an open
/// transaction leaves that transaction usable, so the runner can tolerate an
/// ignorable failure and carry on with the next statement.
#[async_trait]
pub trait SchemaConnection: Send {
    /// Database name, for logs
    fn target(&self) -> &str;

    /// Create the ledger table if it does not exist yet
    async fn ensure_ledger(&mut self) -> Result<(), StatementError>;

    async fn ledger_entries(&mut self) -> Result<Vec<LedgerEntry>, StatementError>;

    async fn begin(&mut self) -> Result<(), StatementError>;

    async fn execute(&mut self, statement: &str) -> Result<(), StatementError>;

    /// Insert the ledger row for a unit inside the open transaction
    async fn record_applied(&mut self, migration_id: &str) -> Result<(), StatementError>;

    async fn commit(&mut self) -> Result<(), StatementError>;

    async fn rollback(&mut self) -> Result<(), StatementError>;

    async fn close(self: Box<Self>) -> Result<(), StatementError>;
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Invalid database name: {0}")]
    InvalidDatabaseName(String),

    #[error("Cannot connect to {target}: {message}")]
    Unreachable { target: String, message: String },
}

/// Capability to open a dedicated connection to one database on a server
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(
        &self,
        server: &ServerCredential,
        database: &str,
    ) -> Result<Box<dyn SchemaConnection>, ConnectError>;
}
