use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::database::models::tenant::TenantStatus;
use crate::services::{PgTenantDirectory, TenantDirectory, TenantFilter};

#[derive(Subcommand)]
pub enum TenantCommands {
    #[command(about = "List tenants in the directory")]
    List {
        #[arg(long, help = "Only tenants with this status")]
        status: Option<TenantStatus>,
    },

    #[command(about = "Show one tenant")]
    Show {
        #[arg(help = "Tenant slug")]
        slug: String,
    },
}

pub async fn handle(cmd: TenantCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let directory = PgTenantDirectory::new().await?;

    match cmd {
        TenantCommands::List { status } => {
            let filter = TenantFilter {
                status,
                slugs: Vec::new(),
            };
            let tenants = directory.list_tenants(&filter).await?;

            if tenants.is_empty() {
                return output_empty_collection(&output_format, "tenants", "No tenants found");
            }

            match output_format {
                OutputFormat::Json => output_json(&json!({ "tenants": tenants }))?,
                OutputFormat::Text => {
                    println!(
                        "{:<24} {:<30} {:<12} {:<14} {:<12} {}",
                        "SLUG", "DATABASE", "SERVER", "STATUS", "INDUSTRY", "PLAN"
                    );
                    println!("{}", "-".repeat(100));
                    for tenant in &tenants {
                        println!(
                            "{:<24} {:<30} {:<12} {:<14} {:<12} {}",
                            clip(&tenant.slug, 24),
                            clip(&tenant.database_name, 30),
                            clip(&tenant.server_ref, 12),
                            tenant.status,
                            tenant.industry.as_deref().unwrap_or("-"),
                            tenant.plan_ref.as_deref().unwrap_or("-")
                        );
                    }
                }
            }

            Ok(())
        }
        TenantCommands::Show { slug } => {
            let tenant = directory
                .find_tenant(&slug)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Tenant '{}' not found", slug))?;

            let server = directory.server_credential(&tenant.server_ref).await?;

            match output_format {
                OutputFormat::Json => output_json(&json!({ "tenant": tenant, "server": server }))?,
                OutputFormat::Text => {
                    println!("Tenant: {} ({})", tenant.slug, tenant.tenant_id);
                    println!("Status: {}", tenant.status);
                    match &server {
                        Some(server) => println!("Database: {}", server.display_dsn(&tenant.database_name)),
                        None => println!("Database: {} on unknown server '{}'", tenant.database_name, tenant.server_ref),
                    }
                    println!("Industry: {}", tenant.industry.as_deref().unwrap_or("-"));
                    println!("Plan: {}", tenant.plan_ref.as_deref().unwrap_or("-"));
                }
            }

            Ok(())
        }
    }
}
