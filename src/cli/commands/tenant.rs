use clap::Subcommand;
use serde_json::json;

use crate::cli::OutputFormat;
use crate::tenant::directory::TenantCatalog;

#[derive(Subcommand)]
pub enum TenantCommands {
    #[command(about = "List tenant-owner accounts and their schemas")]
    List,

    #[command(about = "Diff the account list against physical schemas")]
    Reconcile,
}

pub async fn handle(cmd: TenantCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let (directory, _pool) = super::open_directory().await?;

    match cmd {
        TenantCommands::List => {
            let table = directory.routing_table().await?;

            match output_format {
                OutputFormat::Json => {
                    let mut tenants = Vec::with_capacity(table.tenants.len());
                    for tenant in &table.tenants {
                        let exists = directory.schema_exists(&tenant.schema).await?;
                        tenants.push(json!({
                            "account_id": tenant.account_id,
                            "display_name": tenant.display_name,
                            "schema": tenant.schema,
                            "provisioned": exists,
                        }));
                    }
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({
                            "tenants": tenants,
                            "rejected": table.rejected,
                        }))?
                    );
                }
                OutputFormat::Text => {
                    println!("{:<38} {:<30} {:<30} {}", "ACCOUNT", "DISPLAY NAME", "SCHEMA", "PROVISIONED");
                    println!("{}", "-".repeat(110));
                    for tenant in &table.tenants {
                        let exists = directory.schema_exists(&tenant.schema).await?;
                        println!(
                            "{:<38} {:<30} {:<30} {}",
                            tenant.account_id,
                            tenant.display_name,
                            tenant.schema,
                            if exists { "yes" } else { "no" }
                        );
                    }
                    for rejected in &table.rejected {
                        println!("! {} ({}): {}", rejected.account_id, rejected.display_name, rejected.reason);
                    }
                }
            }
            Ok(())
        }
        TenantCommands::Reconcile => {
            let report = directory.reconcile().await?;

            match output_format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                OutputFormat::Text => {
                    println!("Routed tenants: {}", report.routed.len());
                    if report.orphan_schemas.is_empty() && report.unprovisioned.is_empty() {
                        println!("Accounts and physical schemas are in agreement.");
                    }
                    for orphan in &report.orphan_schemas {
                        println!("orphan schema (no owning account): {}", orphan);
                    }
                    for tenant in &report.unprovisioned {
                        println!(
                            "unprovisioned: {} ({}) expects schema {}",
                            tenant.account_id, tenant.display_name, tenant.schema
                        );
                    }
                }
            }
            Ok(())
        }
    }
}
