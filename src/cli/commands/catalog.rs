use std::path::PathBuf;

use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::migration::Scope;

#[derive(Subcommand)]
pub enum CatalogCommands {
    #[command(about = "List catalog units in apply order")]
    List {
        #[arg(long, help = "Catalog directory (defaults to MIGRATE_CATALOG_DIR)")]
        catalog: Option<PathBuf>,

        #[arg(long, help = "Only units for this scope (core or tenant)")]
        scope: Option<String>,
    },
}

fn parse_scope(raw: &str) -> anyhow::Result<Scope> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "core" => Ok(Scope::Core),
        "tenant" => Ok(Scope::Tenant),
        other => Err(anyhow::anyhow!("Unknown scope '{}', expected 'core' or 'tenant'", other)),
    }
}

pub async fn handle(cmd: CatalogCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        CatalogCommands::List { catalog, scope } => {
            let mut loaded = load_catalog(&catalog_dir(catalog), None)?;
            if let Some(raw) = scope {
                loaded = loaded.scoped(parse_scope(&raw)?);
            }

            if loaded.is_empty() {
                return output_empty_collection(&output_format, "units", "No migration units found");
            }

            match output_format {
                OutputFormat::Json => {
                    let units: Vec<_> = loaded
                        .units()
                        .iter()
                        .map(|unit| {
                            json!({
                                "id": unit.id,
                                "applies_to": unit.applies_to,
                                "description": unit.description,
                                "statements": unit.statements.len(),
                            })
                        })
                        .collect();
                    output_json(&json!({ "units": units }))?;
                }
                OutputFormat::Text => {
                    println!("{:<36} {:<8} {:>5} {}", "ID", "SCOPE", "STMTS", "DESCRIPTION");
                    println!("{}", "-".repeat(80));
                    for unit in loaded.units() {
                        println!(
                            "{:<36} {:<8} {:>5} {}",
                            clip(&unit.id, 36),
                            unit.applies_to,
                            unit.statements.len(),
                            unit.description.as_deref().unwrap_or("")
                        );
                    }
                }
            }

            Ok(())
        }
    }
}
