use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor};

use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::models::ledger::{
    LedgerEntry, CREATE_LEDGER_SQL, INSERT_LEDGER_SQL, SELECT_LEDGER_SQL,
};
use crate::database::models::server::ServerCredential;
use crate::migration::connection::{ConnectError, ConnectionFactory, SchemaConnection, StatementError};

const STATEMENT_SAVEPOINT: &str = "migration_statement";

impl From<sqlx::Error> for StatementError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                StatementError::database(db_err.code().map(|c| c.into_owned()), db_err.message())
            }
            sqlx::Error::Io(e) => StatementError::connection(e.to_string()),
            sqlx::Error::Tls(e) => StatementError::connection(e.to_string()),
            sqlx::Error::PoolTimedOut => StatementError::timeout("timed out waiting for a connection"),
            other @ (sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed) => {
                StatementError::connection(other.to_string())
            }
            other => StatementError::other(other.to_string()),
        }
    }
}

/// Dedicated Postgres connection for one database's migration run.
///
/// Statements inside a unit transaction each run under a savepoint: Postgres
/// aborts the whole transaction on the first error, so a tolerated failure
/// must be rolled back to the savepoint before the next statement.
pub struct PgSchemaConnection {
    database: String,
    conn: PgConnection,
    in_transaction: bool,
}

impl PgSchemaConnection {
    pub async fn connect_with(options: &PgConnectOptions, database: &str) -> Result<Self, sqlx::Error> {
        let conn = PgConnection::connect_with(options).await?;
        Ok(Self {
            database: database.to_string(),
            conn,
            in_transaction: false,
        })
    }

    /// Connect from a full database URL (used for the central database)
    pub async fn connect_url(database_url: &str) -> Result<Self, DatabaseError> {
        let parsed = url::Url::parse(database_url).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        let database = parsed.path().trim_start_matches('/').to_string();
        if !DatabaseManager::is_valid_db_name(&database) {
            return Err(DatabaseError::InvalidTenantName(database));
        }

        let options: PgConnectOptions = database_url.parse()?;
        Ok(Self::connect_with(&options, &database).await?)
    }

    async fn simple(&mut self, sql: &str) -> Result<(), StatementError> {
        (&mut self.conn).execute(sql).await?;
        Ok(())
    }
}

#[async_trait]
impl SchemaConnection for PgSchemaConnection {
    fn target(&self) -> &str {
        &self.database
    }

    async fn ensure_ledger(&mut self) -> Result<(), StatementError> {
        self.simple(CREATE_LEDGER_SQL).await
    }

    async fn ledger_entries(&mut self) -> Result<Vec<LedgerEntry>, StatementError> {
        let entries = sqlx::query_as::<_, LedgerEntry>(SELECT_LEDGER_SQL)
            .fetch_all(&mut self.conn)
            .await?;
        Ok(entries)
    }

    async fn begin(&mut self) -> Result<(), StatementError> {
        self.simple("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn execute(&mut self, statement: &str) -> Result<(), StatementError> {
        if !self.in_transaction {
            return self.simple(statement).await;
        }

        self.simple(&format!("SAVEPOINT {}", STATEMENT_SAVEPOINT)).await?;
        match self.simple(statement).await {
            Ok(()) => self.simple(&format!("RELEASE SAVEPOINT {}", STATEMENT_SAVEPOINT)).await,
            Err(err) => {
                let restore = format!(
                    "ROLLBACK TO SAVEPOINT {sp}; RELEASE SAVEPOINT {sp}",
                    sp = STATEMENT_SAVEPOINT
                );
                if let Err(restore_err) = self.simple(&restore).await {
                    tracing::warn!("Could not restore savepoint on {}: {}", self.database, restore_err);
                }
                Err(err)
            }
        }
    }

    async fn record_applied(&mut self, migration_id: &str) -> Result<(), StatementError> {
        sqlx::query(INSERT_LEDGER_SQL)
            .bind(migration_id)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StatementError> {
        self.in_transaction = false;
        self.simple("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), StatementError> {
        self.in_transaction = false;
        self.simple("ROLLBACK").await
    }

    async fn close(self: Box<Self>) -> Result<(), StatementError> {
        let this = *self;
        this.conn.close().await?;
        Ok(())
    }
}

/// Opens tenant connections from registry credentials
pub struct PgConnectionFactory {
    statement_timeout: Duration,
    application_name: String,
}

impl PgConnectionFactory {
    pub fn new(statement_timeout: Duration) -> Self {
        Self {
            statement_timeout,
            application_name: "crm-tenancy".to_string(),
        }
    }

    fn options(&self, server: &ServerCredential, database: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&server.host)
            .port(server.port)
            .username(&server.user)
            .password(&server.secret)
            .database(database)
            .application_name(&self.application_name)
            // Server-side backstop for the runner's own timeout
            .options([("statement_timeout", self.statement_timeout.as_millis().to_string())])
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(
        &self,
        server: &ServerCredential,
        database: &str,
    ) -> Result<Box<dyn SchemaConnection>, ConnectError> {
        if !DatabaseManager::is_valid_db_name(database) {
            return Err(ConnectError::InvalidDatabaseName(database.to_string()));
        }

        let options = self.options(server, database);
        let conn = PgSchemaConnection::connect_with(&options, database)
            .await
            .map_err(|e| ConnectError::Unreachable {
                target: server.display_dsn(database),
                message: e.to_string(),
            })?;

        tracing::debug!("Connected to {}", server.display_dsn(database));
        Ok(Box::new(conn))
    }
}
