//! In-memory stand-ins for databases, connection factories and the tenant
//! directory, so migration and fan-out behaviour can be tested without a
//! running Postgres.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::database::models::ledger::LedgerEntry;
use crate::database::models::server::ServerCredential;
use crate::database::models::tenant::{TenantRecord, TenantStatus};
use crate::entitlement::plan::PlanConfig;
use crate::migration::connection::{ConnectError, ConnectionFactory, SchemaConnection, StatementError};
use crate::services::tenant_directory::{DirectoryError, TenantDirectory, TenantFilter};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct DatabaseState {
    ledger: Vec<String>,
    committed: Vec<String>,
    failures: HashMap<String, StatementError>,
    delays: HashMap<String, Duration>,
    ledger_failure: Option<StatementError>,
    commit_stall: Option<Duration>,
}

/// A database that records committed statements and ledger rows
#[derive(Clone)]
pub struct MemoryDatabase {
    name: String,
    state: Arc<Mutex<DatabaseState>>,
}

impl MemoryDatabase {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(DatabaseState::default())),
        }
    }

    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            db: self.clone(),
            tx: None,
            latency: Duration::ZERO,
            tracker: None,
        }
    }

    /// Make every execution of `statement` fail with `error`
    pub fn fail_statement(&self, statement: &str, error: StatementError) {
        lock(&self.state).failures.insert(statement.to_string(), error);
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failures.clear();
    }

    pub fn delay_statement(&self, statement: &str, delay: Duration) {
        lock(&self.state).delays.insert(statement.to_string(), delay);
    }

    /// Commits land, then the acknowledgement hangs for `stall`
    pub fn stall_after_commit(&self, stall: Duration) {
        lock(&self.state).commit_stall = Some(stall);
    }

    pub fn fail_ledger(&self, error: StatementError) {
        lock(&self.state).ledger_failure = Some(error);
    }

    pub fn ledger_ids(&self) -> Vec<String> {
        let mut ids = lock(&self.state).ledger.clone();
        ids.sort();
        ids
    }

    pub fn committed_statements(&self) -> Vec<String> {
        lock(&self.state).committed.clone()
    }
}

#[derive(Default)]
struct Transaction {
    statements: Vec<String>,
    ledger: Vec<String>,
}

/// Decrements in-flight counters when its connection goes away
struct ConnectionTracker {
    address: String,
    factory: Arc<FactoryState>,
}

impl Drop for ConnectionTracker {
    fn drop(&mut self) {
        self.factory.open.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = lock(&self.factory.per_server).get_mut(&self.address) {
            *count = count.saturating_sub(1);
        }
    }
}

pub struct MemoryConnection {
    db: MemoryDatabase,
    tx: Option<Transaction>,
    latency: Duration,
    tracker: Option<ConnectionTracker>,
}

impl MemoryConnection {
    fn ledger_failure(&self) -> Option<StatementError> {
        lock(&self.db.state).ledger_failure.clone()
    }
}

#[async_trait]
impl SchemaConnection for MemoryConnection {
    fn target(&self) -> &str {
        &self.db.name
    }

    async fn ensure_ledger(&mut self) -> Result<(), StatementError> {
        match self.ledger_failure() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn ledger_entries(&mut self) -> Result<Vec<LedgerEntry>, StatementError> {
        if let Some(err) = self.ledger_failure() {
            return Err(err);
        }
        Ok(self
            .db
            .ledger_ids()
            .into_iter()
            .map(|migration_id| LedgerEntry {
                migration_id,
                applied_at: Utc::now(),
            })
            .collect())
    }

    async fn begin(&mut self) -> Result<(), StatementError> {
        if self.tx.is_some() {
            return Err(StatementError::other("transaction already open"));
        }
        self.tx = Some(Transaction::default());
        Ok(())
    }

    async fn execute(&mut self, statement: &str) -> Result<(), StatementError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let (failure, delay) = {
            let state = lock(&self.db.state);
            (state.failures.get(statement).cloned(), state.delays.get(statement).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }

        match self.tx.as_mut() {
            Some(tx) => tx.statements.push(statement.to_string()),
            None => lock(&self.db.state).committed.push(statement.to_string()),
        }
        Ok(())
    }

    async fn record_applied(&mut self, migration_id: &str) -> Result<(), StatementError> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| StatementError::other("no open transaction"))?;
        tx.ledger.push(migration_id.to_string());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StatementError> {
        let tx = self.tx.take().ok_or_else(|| StatementError::other("no open transaction"))?;
        let stall = {
            let mut state = lock(&self.db.state);
            state.committed.extend(tx.statements);
            state.ledger.extend(tx.ledger);
            state.commit_stall
        };
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StatementError> {
        self.tx = None;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), StatementError> {
        Ok(())
    }
}

#[derive(Default)]
struct FactoryState {
    databases: Mutex<HashMap<String, MemoryDatabase>>,
    unreachable: Mutex<Vec<String>>,
    connect_delays: Mutex<HashMap<String, Duration>>,
    per_server: Mutex<HashMap<String, usize>>,
    max_per_server: AtomicUsize,
    open: AtomicUsize,
    max_open: AtomicUsize,
    connects: AtomicUsize,
}

/// Hands out connections to [`MemoryDatabase`]s, created on first use, and
/// records how many were open at once per server address.
pub struct MemoryConnectionFactory {
    state: Arc<FactoryState>,
    latency: Duration,
    cancel_on_connect: Option<CancellationToken>,
    cancelled: AtomicBool,
}

impl MemoryConnectionFactory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(FactoryState::default()),
            latency: Duration::ZERO,
            cancel_on_connect: None,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Every statement sleeps this long, so concurrent runs overlap
    pub fn with_statement_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Cancel `token` as soon as the first connection opens
    pub fn cancel_on_first_connect(mut self, token: CancellationToken) -> Self {
        self.cancel_on_connect = Some(token);
        self
    }

    pub fn make_unreachable(&self, database: &str) {
        lock(&self.state.unreachable).push(database.to_string());
    }

    /// Connecting to `database` takes `delay` before anything else happens
    pub fn delay_connect(&self, database: &str, delay: Duration) {
        lock(&self.state.connect_delays).insert(database.to_string(), delay);
    }

    pub fn database(&self, name: &str) -> MemoryDatabase {
        lock(&self.state.databases)
            .entry(name.to_string())
            .or_insert_with(|| MemoryDatabase::new(name))
            .clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    pub fn max_in_flight_per_server(&self) -> usize {
        self.state.max_per_server.load(Ordering::SeqCst)
    }

    pub fn max_in_flight_total(&self) -> usize {
        self.state.max_open.load(Ordering::SeqCst)
    }
}

impl Default for MemoryConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn connect(
        &self,
        server: &ServerCredential,
        database: &str,
    ) -> Result<Box<dyn SchemaConnection>, ConnectError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        let delay = lock(&self.state.connect_delays).get(database).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if lock(&self.state.unreachable).iter().any(|d| d == database) {
            return Err(ConnectError::Unreachable {
                target: server.display_dsn(database),
                message: "connection refused".to_string(),
            });
        }

        let address = server.address();
        {
            let mut per_server = lock(&self.state.per_server);
            let count = per_server.entry(address.clone()).or_insert(0);
            *count += 1;
            self.state.max_per_server.fetch_max(*count, Ordering::SeqCst);
        }
        let open = self.state.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_open.fetch_max(open, Ordering::SeqCst);

        if let Some(token) = &self.cancel_on_connect {
            if !self.cancelled.swap(true, Ordering::SeqCst) {
                token.cancel();
            }
        }

        let mut conn = self.database(database).connect();
        conn.latency = self.latency;
        conn.tracker = Some(ConnectionTracker {
            address,
            factory: Arc::clone(&self.state),
        });
        Ok(Box::new(conn))
    }
}

#[derive(Default)]
struct DirectoryState {
    tenants: Vec<TenantRecord>,
    servers: HashMap<String, ServerCredential>,
    plans: HashMap<String, PlanConfig>,
    offline: bool,
}

#[derive(Default)]
pub struct MemoryTenantDirectory {
    state: Mutex<DirectoryState>,
}

impl MemoryTenantDirectory {
    pub fn with_server(server_id: &str) -> Self {
        let directory = Self::default();
        directory.add_server(server_id);
        directory
    }

    /// Each server id gets its own host
    pub fn add_server(&self, server_id: &str) {
        lock(&self.state).servers.insert(
            server_id.to_string(),
            ServerCredential {
                server_id: server_id.to_string(),
                host: format!("{}.internal", server_id),
                port: 5432,
                user: "crm".to_string(),
                secret: "s3cret".to_string(),
            },
        );
    }

    pub fn add_tenant(&self, tenant: TenantRecord) {
        lock(&self.state).tenants.push(tenant);
    }

    pub fn add_plan(&self, plan_id: &str, plan: PlanConfig) {
        lock(&self.state).plans.insert(plan_id.to_string(), plan);
    }

    /// Every lookup fails from now on
    pub fn go_offline(&self) {
        lock(&self.state).offline = true;
    }

    fn online(&self) -> Result<MutexGuard<'_, DirectoryState>, DirectoryError> {
        let state = lock(&self.state);
        if state.offline {
            return Err(DirectoryError::Unavailable("registry offline".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl TenantDirectory for MemoryTenantDirectory {
    async fn list_tenants(&self, filter: &TenantFilter) -> Result<Vec<TenantRecord>, DirectoryError> {
        let mut tenants: Vec<TenantRecord> = self
            .online()?
            .tenants
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tenants.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(tenants)
    }

    async fn find_tenant(&self, slug: &str) -> Result<Option<TenantRecord>, DirectoryError> {
        Ok(self.online()?.tenants.iter().find(|t| t.slug == slug).cloned())
    }

    async fn server_credential(&self, server_ref: &str) -> Result<Option<ServerCredential>, DirectoryError> {
        Ok(self.online()?.servers.get(server_ref).cloned())
    }

    async fn plan_config(&self, plan_ref: &str) -> Result<Option<PlanConfig>, DirectoryError> {
        Ok(self.online()?.plans.get(plan_ref).cloned())
    }
}

/// Active tenant whose database is `tenant_<slug>`
pub fn tenant_record(slug: &str, server_ref: &str) -> TenantRecord {
    TenantRecord {
        tenant_id: Uuid::new_v4(),
        slug: slug.to_string(),
        database_name: format!("tenant_{}", slug),
        server_ref: server_ref.to_string(),
        status: TenantStatus::Active,
        industry: None,
        plan_ref: None,
    }
}
