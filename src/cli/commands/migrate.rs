use clap::Subcommand;
use serde_json::json;
use std::time::Duration;

use crate::cli::OutputFormat;
use crate::migrate::{builtin_steps, MigrationEngine, MigrationRun, StepStatus};

#[derive(Subcommand)]
pub enum MigrateCommands {
    #[command(about = "Apply all pending steps to every tenant schema")]
    Up {
        #[arg(long, help = "Override worker pool size")]
        concurrency: Option<usize>,

        #[arg(long, help = "Override per-tenant deadline in seconds")]
        timeout_secs: Option<u64>,
    },

    #[command(about = "Report which steps have been applied where")]
    Status,
}

pub async fn handle(cmd: MigrateCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let (directory, pool) = super::open_directory().await?;
    let steps = builtin_steps();

    match cmd {
        MigrateCommands::Up { concurrency, timeout_secs } => {
            let mut engine = MigrationEngine::new(directory, pool);
            if let Some(n) = concurrency {
                engine = engine.with_concurrency(n);
            }
            if let Some(secs) = timeout_secs {
                engine = engine.with_tenant_timeout(Duration::from_secs(secs));
            }

            // Per-tenant failures are report entries, not a process failure.
            // Only directory unavailability or a malformed step gets here as Err.
            let run = engine.run(&steps).await?;
            print_run(&run, &output_format)?;
            Ok(())
        }
        MigrateCommands::Status => {
            let engine = MigrationEngine::new(directory, pool);
            let run = engine.status(&steps).await?;
            print_run(&run, &output_format)?;
            Ok(())
        }
    }
}

fn print_run(run: &MigrationRun, output_format: &OutputFormat) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "summary": run.summary(),
                    "outcomes": run.outcomes,
                }))?
            );
        }
        OutputFormat::Text => {
            println!("{:<30} {:<40} {:<8} {}", "TENANT", "STEP", "STATUS", "DETAIL");
            println!("{}", "-".repeat(100));
            for outcome in &run.outcomes {
                let status = match outcome.status {
                    StepStatus::Applied => "applied",
                    StepStatus::Skipped => "skipped",
                    StepStatus::Failed => "FAILED",
                    StepStatus::Pending => "pending",
                };
                println!(
                    "{:<30} {:<40} {:<8} {}",
                    outcome.tenant,
                    outcome.step_id,
                    status,
                    outcome.detail.as_deref().unwrap_or("")
                );
            }
            println!();
            println!("{}", run.summary());
        }
    }
    Ok(())
}
