use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::FanOutConfig;
use crate::database::models::server::ServerCredential;
use crate::database::models::tenant::TenantRecord;
use crate::migration::catalog::{Catalog, MigrationUnit, Scope};
use crate::migration::connection::ConnectionFactory;
use crate::migration::report::MigrationReport;
use crate::migration::runner::MigrationRunner;
use crate::services::tenant_directory::{DirectoryError, TenantDirectory, TenantFilter};

/// Only failures that prevent the run from starting escape the orchestrator
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Tenant directory unavailable: {0}")]
    Directory(#[from] DirectoryError),
}

#[derive(Debug, Clone)]
pub struct FanOutOptions {
    pub max_concurrency: usize,
    /// Concurrent tenant runs allowed against one physical server
    pub per_server_concurrency: usize,
    pub connect_timeout: Duration,
    /// Report pending units per tenant without applying them
    pub dry_run: bool,
}

impl FanOutOptions {
    pub fn from_config(config: &FanOutConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            per_server_concurrency: config.per_server_concurrency,
            connect_timeout: config.connect_timeout(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TenantOutcome {
    Migrated { report: MigrationReport },
    Planned { pending: Vec<String> },
    Failed { error: String, report: Option<MigrationReport> },
    Cancelled,
}

impl TenantOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TenantOutcome::Migrated { .. } | TenantOutcome::Planned { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            TenantOutcome::Migrated { .. } => "ok",
            TenantOutcome::Planned { .. } => "planned",
            TenantOutcome::Failed { .. } => "failed",
            TenantOutcome::Cancelled => "cancelled",
        }
    }

    /// Units applied, or pending in a dry run
    pub fn unit_count(&self) -> usize {
        match self {
            TenantOutcome::Migrated { report } => report.applied.len(),
            TenantOutcome::Planned { pending } => pending.len(),
            TenantOutcome::Failed { report: Some(report), .. } => report.applied.len(),
            _ => 0,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        TenantOutcome::Failed {
            error: error.into(),
            report: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantResult {
    pub tenant_id: Uuid,
    pub slug: String,
    pub database: String,
    #[serde(flatten)]
    pub outcome: TenantOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct FanOutSummary {
    pub per_tenant: Vec<TenantResult>,
    pub success_count: usize,
    pub error_count: usize,
    pub cancelled_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl FanOutSummary {
    fn new(per_tenant: Vec<TenantResult>, started_at: DateTime<Utc>) -> Self {
        let success_count = per_tenant.iter().filter(|t| t.outcome.is_success()).count();
        let cancelled_count = per_tenant
            .iter()
            .filter(|t| matches!(t.outcome, TenantOutcome::Cancelled))
            .count();
        let error_count = per_tenant.len() - success_count - cancelled_count;

        Self {
            per_tenant,
            success_count,
            error_count,
            cancelled_count,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = (&TenantResult, &str)> {
        self.per_tenant.iter().filter_map(|t| match &t.outcome {
            TenantOutcome::Failed { error, .. } => Some((t, error.as_str())),
            _ => None,
        })
    }

    /// Nothing failed and nothing was left unstarted
    pub fn is_clean(&self) -> bool {
        self.error_count == 0 && self.cancelled_count == 0
    }
}

/// Applies the tenant-scoped catalog to every tenant database in the
/// directory, isolating each tenant's failures from the others.
pub struct TenantOrchestrator {
    directory: Arc<dyn TenantDirectory>,
    factory: Arc<dyn ConnectionFactory>,
    runner: MigrationRunner,
    options: FanOutOptions,
}

impl TenantOrchestrator {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        factory: Arc<dyn ConnectionFactory>,
        runner: MigrationRunner,
        options: FanOutOptions,
    ) -> Self {
        Self {
            directory,
            factory,
            runner,
            options,
        }
    }

    pub async fn run_for_all_tenants(
        &self,
        catalog: &Catalog,
        filter: &TenantFilter,
        cancel: &CancellationToken,
    ) -> Result<FanOutSummary, OrchestratorError> {
        let started_at = Utc::now();

        let tenants = self.directory.list_tenants(filter).await.map_err(|e| {
            tracing::error!("Cannot list tenants, aborting run: {}", e);
            e
        })?;

        let units: Arc<Vec<MigrationUnit>> = Arc::new(catalog.scoped(Scope::Tenant).units().to_vec());
        tracing::info!(
            "Fan-out starting: tenants={}, units={}, max_concurrency={}, per_server={}, dry_run={}",
            tenants.len(),
            units.len(),
            self.options.max_concurrency,
            self.options.per_server_concurrency,
            self.options.dry_run
        );

        let servers = self.resolve_servers(&tenants).await;
        let global = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut server_gates: HashMap<String, Arc<Semaphore>> = HashMap::new();

        let mut handles = Vec::with_capacity(tenants.len());
        for tenant in &tenants {
            let server = servers
                .get(&tenant.server_ref)
                .cloned()
                .unwrap_or_else(|| Err(format!("unknown server '{}'", tenant.server_ref)));

            // Gate on the physical address: several registry rows may share a host
            let server_gate = server.as_ref().ok().map(|cred| {
                Arc::clone(server_gates.entry(cred.address()).or_insert_with(|| {
                    Arc::new(Semaphore::new(self.options.per_server_concurrency.max(1)))
                }))
            });

            let job = TenantJob {
                tenant: tenant.clone(),
                server,
                units: Arc::clone(&units),
                factory: Arc::clone(&self.factory),
                runner: self.runner.clone(),
                connect_timeout: self.options.connect_timeout,
                dry_run: self.options.dry_run,
                global: Arc::clone(&global),
                server_gate,
                cancel: cancel.clone(),
            };
            handles.push(tokio::spawn(job.run()));
        }

        let joined = futures::future::join_all(handles).await;

        let per_tenant = tenants
            .into_iter()
            .zip(joined)
            .map(|(tenant, result)| {
                let outcome = result.unwrap_or_else(|e| {
                    tracing::error!("Tenant task for {} aborted: {}", tenant.slug, e);
                    TenantOutcome::failed(format!("tenant task aborted: {}", e))
                });
                TenantResult {
                    tenant_id: tenant.tenant_id,
                    slug: tenant.slug,
                    database: tenant.database_name,
                    outcome,
                }
            })
            .collect();

        let summary = FanOutSummary::new(per_tenant, started_at);
        tracing::info!(
            "Fan-out finished: success={}, errors={}, cancelled={}",
            summary.success_count,
            summary.error_count,
            summary.cancelled_count
        );
        Ok(summary)
    }

    /// Look up each distinct server once. Failures stay per tenant.
    async fn resolve_servers(&self, tenants: &[TenantRecord]) -> HashMap<String, Result<ServerCredential, String>> {
        let mut servers = HashMap::new();

        for tenant in tenants {
            if servers.contains_key(&tenant.server_ref) {
                continue;
            }

            let lookup = timeout(
                self.options.connect_timeout,
                self.directory.server_credential(&tenant.server_ref),
            )
            .await;

            let resolved = match lookup {
                Ok(Ok(Some(credential))) => Ok(credential),
                Ok(Ok(None)) => Err(format!("unknown server '{}'", tenant.server_ref)),
                Ok(Err(e)) => Err(format!("cannot resolve server '{}': {}", tenant.server_ref, e)),
                Err(_) => Err(format!(
                    "resolving server '{}' timed out after {:?}",
                    tenant.server_ref, self.options.connect_timeout
                )),
            };

            if let Err(reason) = &resolved {
                tracing::warn!("{}", reason);
            }
            servers.insert(tenant.server_ref.clone(), resolved);
        }

        servers
    }
}

/// Everything one tenant's run needs, owned so it can move into a task
struct TenantJob {
    tenant: TenantRecord,
    server: Result<ServerCredential, String>,
    units: Arc<Vec<MigrationUnit>>,
    factory: Arc<dyn ConnectionFactory>,
    runner: MigrationRunner,
    connect_timeout: Duration,
    dry_run: bool,
    global: Arc<Semaphore>,
    server_gate: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
}

impl TenantJob {
    async fn run(self) -> TenantOutcome {
        let server = match &self.server {
            Ok(server) => server,
            Err(reason) => {
                if self.cancel.is_cancelled() {
                    return TenantOutcome::Cancelled;
                }
                return TenantOutcome::failed(reason.clone());
            }
        };

        // Server slot first, then a global slot; cancellation wins any wait
        let _server_permit = match &self.server_gate {
            Some(gate) => match acquire(gate, &self.cancel).await {
                Some(permit) => Some(permit),
                None => return TenantOutcome::Cancelled,
            },
            None => None,
        };
        let _global_permit = match acquire(&self.global, &self.cancel).await {
            Some(permit) => permit,
            None => return TenantOutcome::Cancelled,
        };
        if self.cancel.is_cancelled() {
            return TenantOutcome::Cancelled;
        }

        let slug = &self.tenant.slug;
        let database = &self.tenant.database_name;

        let mut conn = match timeout(self.connect_timeout, self.factory.connect(server, database)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                tracing::warn!("Tenant {} unreachable: {}", slug, e);
                return TenantOutcome::failed(e.to_string());
            }
            Err(_) => {
                let message = format!(
                    "connection to {} timed out after {:?}",
                    server.display_dsn(database),
                    self.connect_timeout
                );
                tracing::warn!("Tenant {}: {}", slug, message);
                return TenantOutcome::failed(message);
            }
        };

        let outcome = if self.dry_run {
            match self.runner.pending(conn.as_mut(), &self.units).await {
                Ok(pending) => TenantOutcome::Planned { pending },
                Err(e) => TenantOutcome::failed(e.to_string()),
            }
        } else {
            match self.runner.apply(conn.as_mut(), &self.units).await {
                Ok(report) if report.is_success() => TenantOutcome::Migrated { report },
                Ok(report) => TenantOutcome::Failed {
                    error: report.failure_message().unwrap_or_default(),
                    report: Some(report),
                },
                Err(e) => TenantOutcome::failed(e.to_string()),
            }
        };

        // Release the connection whatever happened above
        match timeout(self.connect_timeout, conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Closing connection for {} failed: {}", slug, e),
            Err(_) => tracing::debug!("Closing connection for {} timed out", slug),
        }

        match &outcome {
            TenantOutcome::Failed { error, .. } => tracing::warn!("Tenant {} failed: {}", slug, error),
            other => tracing::info!("Tenant {}: {} ({} unit(s))", slug, other.label(), other.unit_count()),
        }

        outcome
    }
}

async fn acquire(gate: &Arc<Semaphore>, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = Arc::clone(gate).acquire_owned() => permit.ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::classifier::SqlStateAllowlist;
    use crate::migration::connection::StatementError;
    use crate::testing::{tenant_record, MemoryConnectionFactory, MemoryTenantDirectory};

    fn catalog() -> Catalog {
        Catalog::new(vec![
            MigrationUnit::new("0001_contacts", Scope::Tenant, ["CREATE TABLE contacts"]),
            MigrationUnit::new("0002_deals", Scope::Tenant, ["CREATE TABLE deals"]),
            MigrationUnit::new("0003_registry", Scope::Core, ["CREATE TABLE tenants"]),
            MigrationUnit::new("0004_tasks", Scope::Tenant, ["CREATE TABLE tasks"]),
        ])
        .unwrap()
    }

    fn runner() -> MigrationRunner {
        MigrationRunner::new(Arc::new(SqlStateAllowlist::postgres()), Duration::from_millis(500))
    }

    fn options(max: usize, per_server: usize) -> FanOutOptions {
        FanOutOptions {
            max_concurrency: max,
            per_server_concurrency: per_server,
            connect_timeout: Duration::from_millis(300),
            dry_run: false,
        }
    }

    fn orchestrator(
        directory: MemoryTenantDirectory,
        factory: &Arc<MemoryConnectionFactory>,
        opts: FanOutOptions,
    ) -> TenantOrchestrator {
        TenantOrchestrator::new(Arc::new(directory), factory.clone(), runner(), opts)
    }

    #[tokio::test]
    async fn unreachable_tenant_does_not_stop_others() {
        let directory = MemoryTenantDirectory::with_server("db-1");
        directory.add_tenant(tenant_record("t1", "db-1"));
        directory.add_tenant(tenant_record("t2", "db-1"));
        directory.add_tenant(tenant_record("t3", "db-1"));

        let factory = Arc::new(MemoryConnectionFactory::new());
        factory.make_unreachable("tenant_t2");

        let summary = orchestrator(directory, &factory, options(4, 4))
            .run_for_all_tenants(&catalog(), &TenantFilter::active(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.failures().count(), 1);

        for slug in ["t1", "t3"] {
            assert_eq!(
                factory.database(&format!("tenant_{}", slug)).ledger_ids(),
                vec!["0001_contacts", "0002_deals", "0004_tasks"]
            );
        }
        let (failed, _) = summary.failures().next().unwrap();
        assert_eq!(failed.slug, "t2");
    }

    #[tokio::test]
    async fn unit_failure_is_captured_per_tenant() {
        let directory = MemoryTenantDirectory::with_server("db-1");
        directory.add_tenant(tenant_record("t1", "db-1"));
        directory.add_tenant(tenant_record("t2", "db-1"));

        let factory = Arc::new(MemoryConnectionFactory::new());
        factory
            .database("tenant_t1")
            .fail_statement("CREATE TABLE deals", StatementError::database(Some("23503".into()), "fk violation"));

        let summary = orchestrator(directory, &factory, options(2, 2))
            .run_for_all_tenants(&catalog(), &TenantFilter::active(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.error_count, 1);
        let t1 = &summary.per_tenant[0];
        assert_eq!(t1.slug, "t1");
        match &t1.outcome {
            TenantOutcome::Failed { report: Some(report), .. } => {
                assert_eq!(report.applied, vec!["0001_contacts"]);
                assert_eq!(report.pending, vec!["0004_tasks"]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(factory.database("tenant_t1").ledger_ids(), vec!["0001_contacts"]);
        assert_eq!(factory.database("tenant_t2").ledger_ids().len(), 3);
    }

    #[tokio::test]
    async fn missing_server_fails_only_its_tenants() {
        let directory = MemoryTenantDirectory::with_server("db-1");
        directory.add_tenant(tenant_record("t1", "db-1"));
        directory.add_tenant(tenant_record("orphan", "db-gone"));

        let factory = Arc::new(MemoryConnectionFactory::new());
        let summary = orchestrator(directory, &factory, options(2, 2))
            .run_for_all_tenants(&catalog(), &TenantFilter::active(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.success_count, 1);
        let (failed, error) = summary.failures().next().unwrap();
        assert_eq!(failed.slug, "orphan");
        assert!(error.contains("db-gone"));
    }

    #[tokio::test]
    async fn unreachable_directory_aborts_the_run() {
        let directory = MemoryTenantDirectory::with_server("db-1");
        directory.add_tenant(tenant_record("t1", "db-1"));
        directory.go_offline();

        let factory = Arc::new(MemoryConnectionFactory::new());
        let result = orchestrator(directory, &factory, options(2, 2))
            .run_for_all_tenants(&catalog(), &TenantFilter::active(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(OrchestratorError::Directory(_))));
        assert_eq!(factory.connect_count(), 0);
    }

    #[tokio::test]
    async fn per_server_concurrency_is_bounded() {
        let directory = MemoryTenantDirectory::with_server("db-1");
        directory.add_server("db-2");
        for i in 0..6 {
            directory.add_tenant(tenant_record(&format!("a{}", i), "db-1"));
            directory.add_tenant(tenant_record(&format!("b{}", i), "db-2"));
        }

        let factory = Arc::new(MemoryConnectionFactory::new().with_statement_latency(Duration::from_millis(10)));
        let summary = orchestrator(directory, &factory, options(8, 2))
            .run_for_all_tenants(&catalog(), &TenantFilter::active(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.success_count, 12);
        assert!(factory.max_in_flight_per_server() <= 2);
        assert!(factory.max_in_flight_total() <= 4);
    }

    #[tokio::test]
    async fn global_concurrency_is_bounded_across_servers() {
        let directory = MemoryTenantDirectory::with_server("db-1");
        directory.add_server("db-2");
        directory.add_server("db-3");
        for server in ["db-1", "db-2", "db-3"] {
            for i in 0..3 {
                directory.add_tenant(tenant_record(&format!("{}-t{}", server, i), server));
            }
        }

        let factory = Arc::new(MemoryConnectionFactory::new().with_statement_latency(Duration::from_millis(10)));
        let summary = orchestrator(directory, &factory, options(2, 4))
            .run_for_all_tenants(&catalog(), &TenantFilter::active(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.success_count, 9);
        assert!(factory.max_in_flight_total() <= 2);
        assert!(factory.max_in_flight_total() >= 1);
    }

    #[tokio::test]
    async fn slow_connect_times_out_only_that_tenant() {
        let directory = MemoryTenantDirectory::with_server("db-1");
        for slug in ["fast", "slow", "steady"] {
            directory.add_tenant(tenant_record(slug, "db-1"));
        }

        let factory = Arc::new(MemoryConnectionFactory::new());
        factory.delay_connect("tenant_slow", Duration::from_secs(5));

        let mut opts = options(3, 3);
        opts.connect_timeout = Duration::from_millis(200);
        let summary = orchestrator(directory, &factory, opts)
            .run_for_all_tenants(&catalog(), &TenantFilter::active(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.error_count, 1);
        let (failed, error) = summary.failures().next().unwrap();
        assert_eq!(failed.slug, "slow");
        assert!(error.contains("timed out after"), "unexpected error: {}", error);

        for slug in ["fast", "steady"] {
            assert_eq!(factory.database(&format!("tenant_{}", slug)).ledger_ids().len(), 3);
        }
        assert!(factory.database("tenant_slow").ledger_ids().is_empty());
        assert_eq!(factory.open_connections(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let directory = MemoryTenantDirectory::with_server("db-1");
        directory.add_tenant(tenant_record("t1", "db-1"));
        directory.add_tenant(tenant_record("t2", "db-1"));

        let factory = Arc::new(MemoryConnectionFactory::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = orchestrator(directory, &factory, options(2, 2))
            .run_for_all_tenants(&catalog(), &TenantFilter::active(), &cancel)
            .await
            .unwrap();

        assert_eq!(summary.cancelled_count, 2);
        assert_eq!(summary.error_count, 0);
        assert!(!summary.is_clean());
        assert_eq!(factory.connect_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_lets_in_flight_tenant_finish() {
        let directory = MemoryTenantDirectory::with_server("db-1");
        for slug in ["t1", "t2", "t3"] {
            directory.add_tenant(tenant_record(slug, "db-1"));
        }

        let cancel = CancellationToken::new();
        let factory = Arc::new(MemoryConnectionFactory::new().cancel_on_first_connect(cancel.clone()));

        let summary = orchestrator(directory, &factory, options(1, 1))
            .run_for_all_tenants(&catalog(), &TenantFilter::active(), &cancel)
            .await
            .unwrap();

        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.cancelled_count, 2);
        let finished = summary.per_tenant.iter().find(|t| t.outcome.is_success()).unwrap();
        assert_eq!(factory.database(&finished.database).ledger_ids().len(), 3);
    }

    #[tokio::test]
    async fn dry_run_applies_nothing() {
        let directory = MemoryTenantDirectory::with_server("db-1");
        directory.add_tenant(tenant_record("t1", "db-1"));

        let factory = Arc::new(MemoryConnectionFactory::new());
        let mut opts = options(1, 1);
        opts.dry_run = true;

        let summary = orchestrator(directory, &factory, opts)
            .run_for_all_tenants(&catalog(), &TenantFilter::active(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            summary.per_tenant[0].outcome,
            TenantOutcome::Planned {
                pending: vec!["0001_contacts".into(), "0002_deals".into(), "0004_tasks".into()]
            }
        );
        assert!(factory.database("tenant_t1").ledger_ids().is_empty());
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let directory = Arc::new(MemoryTenantDirectory::with_server("db-1"));
        directory.add_tenant(tenant_record("t1", "db-1"));
        let factory = Arc::new(MemoryConnectionFactory::new());
        let orchestrator = TenantOrchestrator::new(directory.clone(), factory.clone(), runner(), options(1, 1));

        orchestrator
            .run_for_all_tenants(&catalog(), &TenantFilter::active(), &CancellationToken::new())
            .await
            .unwrap();
        let again = orchestrator
            .run_for_all_tenants(&catalog(), &TenantFilter::active(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(again.success_count, 1);
        assert_eq!(again.per_tenant[0].outcome.unit_count(), 0);
        assert_eq!(factory.open_connections(), 0);
    }
}
