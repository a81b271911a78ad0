use clap::Subcommand;
use serde_json::json;
use std::sync::Arc;

use crate::cli::OutputFormat;
use crate::database::models::Channel;
use crate::database::DatabaseManager;
use crate::resolver::{ChartShareResolver, PgChartStore};
use crate::tenant::TenantSchemaId;

#[derive(Subcommand)]
pub enum ChartCommands {
    #[command(about = "Show a rate chart's equivalence class (master + shares)")]
    Class {
        #[arg(help = "Tenant schema identifier")]
        schema: String,

        #[arg(help = "Rate chart id")]
        chart_id: i64,
    },

    #[command(about = "Show machines that downloaded any member of a chart's class")]
    Devices {
        #[arg(help = "Tenant schema identifier")]
        schema: String,

        #[arg(help = "Rate chart id")]
        chart_id: i64,

        #[arg(help = "Milk channel (COW, BUFFALO, MIXED)")]
        channel: Channel,
    },

    #[command(about = "Show the rate grid a chart prices with (its master's rows for a share)")]
    Rates {
        #[arg(help = "Tenant schema identifier")]
        schema: String,

        #[arg(help = "Rate chart id")]
        chart_id: i64,
    },
}

pub async fn handle(cmd: ChartCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        ChartCommands::Class { schema, chart_id } => {
            let schema = TenantSchemaId::parse(&schema)?;
            let pool = DatabaseManager::main_pool().await?;
            let resolver =
                ChartShareResolver::new(Arc::new(PgChartStore::new(schema.clone(), pool)));

            let class = resolver.resolve_equivalence_class(chart_id).await?;
            match output_format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({
                            "schema": schema,
                            "class": class,
                        }))?
                    );
                }
                OutputFormat::Text => {
                    println!("{:<10} {:<38} {:<10} {:<8} {}", "CHART", "SOCIETY", "CHANNEL", "MASTER", "ROWS");
                    println!("{}", "-".repeat(80));
                    for chart in &class {
                        println!(
                            "{:<10} {:<38} {:<10} {:<8} {}",
                            chart.id,
                            chart.society_id,
                            chart.channel.as_str(),
                            if chart.is_master() { "yes" } else { "no" },
                            chart.record_count
                        );
                    }
                }
            }
            Ok(())
        }
        ChartCommands::Devices { schema, chart_id, channel } => {
            let schema = TenantSchemaId::parse(&schema)?;
            let pool = DatabaseManager::main_pool().await?;
            let resolver =
                ChartShareResolver::new(Arc::new(PgChartStore::new(schema.clone(), pool)));

            let machines = resolver.downloading_devices(chart_id, channel).await?;
            match output_format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({
                            "schema": schema,
                            "chart_id": chart_id,
                            "channel": channel,
                            "machines": machines,
                        }))?
                    );
                }
                OutputFormat::Text => {
                    if machines.is_empty() {
                        println!("No machines have downloaded chart {} on {}", chart_id, channel.as_str());
                    }
                    for machine in &machines {
                        println!("{}  {}  (society {})", machine.serial_no, machine.id, machine.society_id);
                    }
                }
            }
            Ok(())
        }
        ChartCommands::Rates { schema, chart_id } => {
            let schema = TenantSchemaId::parse(&schema)?;
            let pool = DatabaseManager::main_pool().await?;
            let resolver =
                ChartShareResolver::new(Arc::new(PgChartStore::new(schema.clone(), pool)));

            let rows = resolver.effective_rate_rows(chart_id).await?;
            match output_format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({
                            "schema": schema,
                            "chart_id": chart_id,
                            "rows": rows,
                        }))?
                    );
                }
                OutputFormat::Text => {
                    if rows.is_empty() {
                        println!("Chart {} has no rate rows", chart_id);
                        return Ok(());
                    }
                    println!("{:<8} {:<8} {}", "FAT", "SNF", "RATE");
                    println!("{}", "-".repeat(26));
                    for row in &rows {
                        println!("{:<8} {:<8} {}", row.fat, row.snf, row.rate);
                    }
                }
            }
            Ok(())
        }
    }
}
