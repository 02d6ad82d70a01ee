use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::config::config;
use crate::database::{DatabaseManager, PgConnectionFactory, PgSchemaConnection};
use crate::database::models::tenant::TenantStatus;
use crate::migration::{MigrationReport, MigrationRunner, SchemaConnection, Scope};
use crate::services::{
    FanOutOptions, FanOutSummary, PgTenantDirectory, TenantFilter, TenantOrchestrator, TenantResult,
};

#[derive(Subcommand)]
pub enum MigrateCommands {
    #[command(about = "Apply tenant-scoped units to every matching tenant database")]
    Tenants(TenantsArgs),

    #[command(about = "Apply core-scoped units to the central registry database")]
    Core {
        #[arg(long, help = "Catalog directory (defaults to MIGRATE_CATALOG_DIR)")]
        catalog: Option<PathBuf>,

        #[arg(long, help = "Stop at this migration id")]
        target: Option<String>,

        #[arg(long, help = "List pending units without applying them")]
        dry_run: bool,
    },
}

#[derive(Args, Debug)]
pub struct TenantsArgs {
    #[arg(long, help = "Catalog directory (defaults to MIGRATE_CATALOG_DIR)")]
    pub catalog: Option<PathBuf>,

    #[arg(long, default_value = "active", help = "Tenant status to target, or 'all'")]
    pub status: String,

    #[arg(long, help = "Only migrate this tenant slug (repeatable)")]
    pub tenant: Vec<String>,

    #[arg(long, help = "Stop at this migration id")]
    pub target: Option<String>,

    #[arg(long, help = "Maximum tenants migrated at once")]
    pub concurrency: Option<usize>,

    #[arg(long = "per-server", help = "Maximum tenants migrated at once per database server")]
    pub per_server: Option<usize>,

    #[arg(long, help = "List pending units per tenant without applying them")]
    pub dry_run: bool,
}

pub async fn handle(cmd: MigrateCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        MigrateCommands::Tenants(args) => migrate_tenants(args, output_format).await,
        MigrateCommands::Core { catalog, target, dry_run } => {
            migrate_core(catalog, target, dry_run, output_format).await
        }
    }
}

fn parse_status(raw: &str) -> anyhow::Result<Option<TenantStatus>> {
    if raw.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    raw.parse::<TenantStatus>().map(Some).map_err(|e| anyhow::anyhow!(e))
}

async fn migrate_tenants(args: TenantsArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let settings = config();
    let catalog = load_catalog(&catalog_dir(args.catalog), args.target.as_deref())?;
    let filter = TenantFilter {
        status: parse_status(&args.status)?,
        slugs: args.tenant,
    };

    let mut options = FanOutOptions::from_config(&settings.fanout);
    options.dry_run = args.dry_run;
    if let Some(n) = args.concurrency {
        options.max_concurrency = n;
    }
    if let Some(n) = args.per_server {
        options.per_server_concurrency = n;
    }

    let directory = PgTenantDirectory::new().await?;
    let factory = PgConnectionFactory::new(settings.migrations.statement_timeout());
    let runner = MigrationRunner::from_config(&settings.migrations);
    let orchestrator = TenantOrchestrator::new(Arc::new(directory), Arc::new(factory), runner, options);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, no new tenants will be started");
            on_signal.cancel();
        }
    });

    let summary = orchestrator.run_for_all_tenants(&catalog, &filter, &cancel).await?;

    match output_format {
        OutputFormat::Json => output_json(&summary)?,
        OutputFormat::Text => print_summary(&summary),
    }

    if !summary.is_clean() {
        return Err(anyhow::anyhow!(
            "{} tenant(s) failed, {} cancelled",
            summary.error_count,
            summary.cancelled_count
        ));
    }
    Ok(())
}

fn print_summary(summary: &FanOutSummary) {
    if summary.per_tenant.is_empty() {
        println!("No tenants matched");
        return;
    }

    println!("{:<8} {:<24} {:<30} {:>8} {}", "ID", "TENANT", "DATABASE", "UNITS", "STATUS");
    println!("{}", "-".repeat(83));
    for tenant in &summary.per_tenant {
        println!("{}", format_row(tenant));
    }

    println!();
    println!(
        "{} succeeded, {} failed, {} cancelled in {}s",
        summary.success_count,
        summary.error_count,
        summary.cancelled_count,
        (summary.finished_at - summary.started_at).num_seconds()
    );

    let mut failures = summary.failures().peekable();
    if failures.peek().is_some() {
        println!();
        println!("Failures:");
        for (tenant, error) in failures {
            println!("  {}: {}", tenant.slug, error);
        }
    }
}

/// Leading block of the tenant id; slugs can be renamed, ids cannot
fn short_id(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

fn format_row(tenant: &TenantResult) -> String {
    format!(
        "{:<8} {:<24} {:<30} {:>8} {}",
        short_id(&tenant.tenant_id),
        clip(&tenant.slug, 24),
        clip(&tenant.database, 30),
        tenant.outcome.unit_count(),
        tenant.outcome.label()
    )
}

async fn migrate_core(
    catalog: Option<PathBuf>,
    target: Option<String>,
    dry_run: bool,
    output_format: OutputFormat,
) -> anyhow::Result<()> {
    let catalog = load_catalog(&catalog_dir(catalog), target.as_deref())?.scoped(Scope::Core);
    let runner = MigrationRunner::from_config(&config().migrations);

    let mut conn = Box::new(PgSchemaConnection::connect_url(&DatabaseManager::central_url()?).await?);

    let result = if dry_run {
        runner.pending(conn.as_mut(), catalog.units()).await.map(CoreOutcome::Pending)
    } else {
        runner.apply(conn.as_mut(), catalog.units()).await.map(CoreOutcome::Applied)
    };

    if let Err(e) = conn.close().await {
        tracing::debug!("Closing central connection failed: {}", e);
    }

    match result? {
        CoreOutcome::Pending(pending) => output_success(
            &output_format,
            &format!("{} core unit(s) pending", pending.len()),
            Some(json!({ "pending": pending })),
        ),
        CoreOutcome::Applied(report) => report_core(report, &output_format),
    }
}

enum CoreOutcome {
    Pending(Vec<String>),
    Applied(MigrationReport),
}

fn report_core(report: MigrationReport, output_format: &OutputFormat) -> anyhow::Result<()> {
    if let Some(message) = report.failure_message() {
        if let OutputFormat::Json = output_format {
            output_json(&report)?;
        }
        return Err(anyhow::anyhow!("Core migration failed: {}", message));
    }

    output_success(
        output_format,
        &format!(
            "Applied {} core unit(s), {} already applied",
            report.applied.len(),
            report.skipped.len()
        ),
        Some(json!({ "report": report })),
    )
}
