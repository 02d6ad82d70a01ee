use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;

use crate::config::MigrationConfig;
use crate::migration::catalog::MigrationUnit;
use crate::migration::classifier::{ErrorClassifier, SqlStateAllowlist};
use crate::migration::connection::{SchemaConnection, StatementError, StatementErrorKind};
use crate::migration::report::{FailedUnit, IgnoredStatement, MigrationReport};

/// Raised only when the ledger itself cannot be prepared or read; every
/// unit-level failure is carried inside the report instead.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Ledger unavailable on {database}: {source}")]
    Ledger {
        database: String,
        #[source]
        source: StatementError,
    },
}

/// Applies pending catalog units to one database, one transaction per unit
#[derive(Clone)]
pub struct MigrationRunner {
    classifier: Arc<dyn ErrorClassifier>,
    statement_timeout: Duration,
}

impl MigrationRunner {
    pub fn new(classifier: Arc<dyn ErrorClassifier>, statement_timeout: Duration) -> Self {
        Self {
            classifier,
            statement_timeout,
        }
    }

    /// Postgres allowlist plus any configured extra codes
    pub fn from_config(config: &MigrationConfig) -> Self {
        let classifier = SqlStateAllowlist::postgres().with_codes(config.extra_ignorable_codes.iter().cloned());
        Self::new(Arc::new(classifier), config.statement_timeout())
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    /// Apply every unit missing from the ledger, in ascending id order.
    /// Stops at the first unit that fails with a non-ignorable error.
    pub async fn apply(
        &self,
        conn: &mut dyn SchemaConnection,
        units: &[MigrationUnit],
    ) -> Result<MigrationReport, RunnerError> {
        let database = conn.target().to_string();
        let applied_ids = self.bootstrap(conn, &database).await?;

        let mut ordered: Vec<&MigrationUnit> = units.iter().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        let mut report = MigrationReport::default();
        let mut remaining = ordered.into_iter();

        while let Some(unit) = remaining.next() {
            if applied_ids.contains(&unit.id) {
                tracing::debug!("Migration {} already applied on {}", unit.id, database);
                report.skipped.push(unit.id.clone());
                continue;
            }

            match self.apply_unit(conn, &database, unit).await {
                Ok(ignored) => {
                    tracing::info!("Applied migration {} on {}", unit.id, database);
                    report.applied.push(unit.id.clone());
                    report.ignored.extend(ignored);
                }
                Err(failed) => {
                    tracing::warn!(
                        "Migration {} failed on {}, stopping: {}",
                        unit.id, database, failed.error
                    );
                    report.failed = Some(failed);

                    // Later units may depend on the failed one
                    for later in remaining.by_ref() {
                        if applied_ids.contains(&later.id) {
                            report.skipped.push(later.id.clone());
                        } else {
                            report.pending.push(later.id.clone());
                        }
                    }
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Ids `apply` would attempt, without executing any unit
    pub async fn pending(
        &self,
        conn: &mut dyn SchemaConnection,
        units: &[MigrationUnit],
    ) -> Result<Vec<String>, RunnerError> {
        let database = conn.target().to_string();
        let applied_ids = self.bootstrap(conn, &database).await?;

        let mut pending: Vec<String> = units
            .iter()
            .filter(|u| !applied_ids.contains(&u.id))
            .map(|u| u.id.clone())
            .collect();
        pending.sort();
        Ok(pending)
    }

    async fn bootstrap(
        &self,
        conn: &mut dyn SchemaConnection,
        database: &str,
    ) -> Result<HashSet<String>, RunnerError> {
        match self.bounded("create ledger", conn.ensure_ledger()).await {
            Ok(()) => {}
            Err(err) if self.classifier.is_ignorable(&err) => {
                tracing::debug!("Ledger on {} created concurrently: {}", database, err);
            }
            Err(source) => {
                return Err(RunnerError::Ledger {
                    database: database.to_string(),
                    source,
                })
            }
        }

        let entries = self
            .bounded("read ledger", conn.ledger_entries())
            .await
            .map_err(|source| RunnerError::Ledger {
                database: database.to_string(),
                source,
            })?;

        Ok(entries.into_iter().map(|e| e.migration_id).collect())
    }

    /// Run one unit inside its own transaction. Returns the tolerated
    /// statement errors on commit, or the failure after rolling back.
    async fn apply_unit(
        &self,
        conn: &mut dyn SchemaConnection,
        database: &str,
        unit: &MigrationUnit,
    ) -> Result<Vec<IgnoredStatement>, FailedUnit> {
        let failed = |statement_index: Option<usize>, error: StatementError| FailedUnit {
            migration_id: unit.id.clone(),
            statement_index,
            error,
        };

        self.bounded("BEGIN", conn.begin())
            .await
            .map_err(|e| failed(None, e))?;

        let mut ignored = Vec::new();

        for (idx, statement) in unit.statements.iter().enumerate() {
            if statement.trim().is_empty() {
                continue;
            }

            match self.bounded("statement", conn.execute(statement)).await {
                Ok(()) => {}
                Err(err) if self.classifier.is_ignorable(&err) => {
                    tracing::warn!(
                        "Ignoring error in {} statement {} on {}: {}",
                        unit.id, idx + 1, database, err
                    );
                    ignored.push(IgnoredStatement {
                        migration_id: unit.id.clone(),
                        statement_index: idx,
                        code: err.code,
                        message: err.message,
                    });
                }
                Err(err) => {
                    self.abort(conn, database, &unit.id).await;
                    return Err(failed(Some(idx), err));
                }
            }
        }

        if let Err(err) = self.bounded("ledger insert", conn.record_applied(&unit.id)).await {
            self.abort(conn, database, &unit.id).await;
            return Err(failed(None, err));
        }

        if let Err(err) = self.bounded("COMMIT", conn.commit()).await {
            self.abort(conn, database, &unit.id).await;
            return Err(failed(None, commit_outcome_unknown(err)));
        }

        Ok(ignored)
    }

    async fn abort(&self, conn: &mut dyn SchemaConnection, database: &str, migration_id: &str) {
        if let Err(err) = self.bounded("ROLLBACK", conn.rollback()).await {
            tracing::error!("Rollback of {} on {} failed: {}", migration_id, database, err);
        }
    }

    /// Execute with timeout protection
    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T, StatementError>
    where
        F: Future<Output = Result<T, StatementError>>,
    {
        match timeout(self.statement_timeout, fut).await {
            Ok(result) => result,
            Err(_elapsed) => Err(StatementError::timeout(format!(
                "{} exceeded {:?}",
                what, self.statement_timeout
            ))),
        }
    }
}

/// A lost or timed-out COMMIT may still have landed on the server, ledger row
/// included, in which case the next run skips the unit.
fn commit_outcome_unknown(err: StatementError) -> StatementError {
    match err.kind {
        StatementErrorKind::Timeout | StatementErrorKind::Connection => StatementError {
            kind: err.kind,
            code: err.code,
            message: format!(
                "commit outcome unknown, check the ledger before re-running: {}",
                err.message
            ),
        },
        _ => err,
    }
}
