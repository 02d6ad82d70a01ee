use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Subcommand;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::config::config;
use crate::entitlement::{EntitlementResolver, EntitlementView, ModuleRegistry, PlanConfig};
use crate::services::{EntitlementService, PgTenantDirectory};

#[derive(Subcommand)]
pub enum EntitlementCommands {
    #[command(about = "Resolve entitlements for a tenant from its directory plan")]
    Show {
        #[arg(help = "Tenant slug")]
        slug: String,
    },

    #[command(about = "Resolve entitlements for an industry and a plan file")]
    Resolve {
        #[arg(long, help = "Tenant industry")]
        industry: String,

        #[arg(long, help = "Plan file (JSON or YAML)")]
        plan: PathBuf,
    },
}

/// Built-in registry unless ENTITLEMENT_MODULES_FILE points elsewhere
fn resolver() -> anyhow::Result<EntitlementResolver> {
    match &config().entitlements.modules_file {
        Some(path) => Ok(EntitlementResolver::new(ModuleRegistry::from_yaml_file(path)?)),
        None => Ok(EntitlementResolver::default()),
    }
}

/// YAML is a superset of JSON, so one parser covers both
fn load_plan(path: &Path) -> anyhow::Result<PlanConfig> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read plan file {}: {}", path.display(), e))?;
    Ok(PlanConfig::from_yaml_str(&raw)?)
}

pub async fn handle(cmd: EntitlementCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let view = match cmd {
        EntitlementCommands::Show { slug } => {
            let directory = PgTenantDirectory::new().await?;
            let service = EntitlementService::new(Arc::new(directory), resolver()?);
            service.for_tenant(&slug).await?
        }
        EntitlementCommands::Resolve { industry, plan } => {
            let plan = load_plan(&plan)?;
            resolver()?.resolve(&industry, &plan)
        }
    };

    match output_format {
        OutputFormat::Json => output_json(&view),
        OutputFormat::Text => {
            print_view(&view);
            Ok(())
        }
    }
}

fn format_limit(value: i64) -> String {
    if value == crate::entitlement::UNLIMITED {
        "unlimited".to_string()
    } else {
        value.to_string()
    }
}

fn print_view(view: &EntitlementView) {
    println!("Industry: {}", view.industry);
    println!("Modules: {}", view.modules.join(", "));

    if !view.limits.is_empty() {
        println!("Limits:");
        for (resource, value) in &view.limits {
            println!("  {:<20} {}", resource, format_limit(*value));
        }
    }
    if !view.communication.is_empty() {
        println!("Communication:");
        for (channel, value) in &view.communication {
            println!("  {:<20} {}", channel, format_limit(*value));
        }
    }
    if !view.features.is_empty() {
        println!("Features: {}", view.features.join(", "));
    }
}
