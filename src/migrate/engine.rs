use futures::stream::{self, StreamExt};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use super::step::{CheckOutcome, MigrationStep, StepError, TenantTarget};
use super::{MigrationOutcome, MigrationRun, StepStatus};
use crate::config::config;
use crate::tenant::directory::{DirectoryError, TenantCatalog, TenantRef};

/// Fatal engine errors. Per-tenant trouble never lands here; it is
/// contained in the run report.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("step {step_id}: {detail}")]
    Contract { step_id: String, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Apply pending steps.
    Up,
    /// Check only; report what a run would do.
    Status,
}

/// Applies ordered migration steps across every known tenant schema.
///
/// There is no cross-schema transaction, so the rollout is tenant-by-tenant
/// and best-effort: one badly-shaped tenant must not halt the other
/// hundreds. Tenants run on a bounded worker pool; steps within one tenant
/// run strictly in order on a single worker.
pub struct MigrationEngine {
    catalog: Arc<dyn TenantCatalog>,
    pool: PgPool,
    concurrency: usize,
    tenant_timeout: Duration,
}

impl MigrationEngine {
    pub fn new(catalog: Arc<dyn TenantCatalog>, pool: PgPool) -> Self {
        Self {
            catalog,
            pool,
            concurrency: config().migration.concurrency,
            tenant_timeout: Duration::from_secs(config().migration.tenant_timeout_secs),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_tenant_timeout(mut self, timeout: Duration) -> Self {
        self.tenant_timeout = timeout;
        self
    }

    /// Apply all steps to all tenants and return the full report.
    pub async fn run(&self, steps: &[Box<dyn MigrationStep>]) -> Result<MigrationRun, EngineError> {
        self.execute(steps, RunMode::Up).await
    }

    /// Report which steps are applied/pending where, without mutating.
    pub async fn status(
        &self,
        steps: &[Box<dyn MigrationStep>],
    ) -> Result<MigrationRun, EngineError> {
        self.execute(steps, RunMode::Status).await
    }

    async fn execute(
        &self,
        steps: &[Box<dyn MigrationStep>],
        mode: RunMode,
    ) -> Result<MigrationRun, EngineError> {
        let tenants = self.catalog.list_tenants().await?;
        info!(
            "Migration {:?}: {} steps across {} tenants (concurrency {})",
            mode,
            steps.len(),
            tenants.len(),
            self.concurrency
        );

        let mut results: Vec<(usize, Result<Vec<MigrationOutcome>, EngineError>)> =
            stream::iter(tenants.iter().enumerate())
                .map(|(idx, tenant)| async move {
                    (idx, self.run_tenant(tenant, steps, mode).await)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        // Cross-tenant completion order is unspecified; report in stable
        // directory order regardless.
        results.sort_by_key(|(idx, _)| *idx);

        let mut run = MigrationRun::default();
        for (_, result) in results {
            run.outcomes.extend(result?);
        }

        info!("Migration {:?} complete: {}", mode, run.summary());
        Ok(run)
    }

    /// Full step sequence for one tenant. Everything data-level is caught
    /// and folded into outcomes; only contract violations escape.
    async fn run_tenant(
        &self,
        tenant: &TenantRef,
        steps: &[Box<dyn MigrationStep>],
        mode: RunMode,
    ) -> Result<Vec<MigrationOutcome>, EngineError> {
        let schema = &tenant.schema;
        let mut outcomes = Vec::with_capacity(steps.len());

        // The deadline covers everything done on the tenant's behalf,
        // including the existence probe itself.
        let deadline = Instant::now() + self.tenant_timeout;

        match timeout(self.tenant_timeout, self.catalog.schema_exists(schema)).await {
            Err(_) => {
                warn!("Existence check timed out for schema {}", schema);
                for step in steps {
                    outcomes.push(MigrationOutcome::new(
                        schema,
                        step.id(),
                        StepStatus::Failed,
                        Some(format!(
                            "schema existence check timed out after {:?}",
                            self.tenant_timeout
                        )),
                    ));
                }
                return Ok(outcomes);
            }
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                // Account exists, schema not provisioned yet. Behind, not broken.
                for step in steps {
                    outcomes.push(MigrationOutcome::new(
                        schema,
                        step.id(),
                        StepStatus::Skipped,
                        Some("schema not provisioned".to_string()),
                    ));
                }
                return Ok(outcomes);
            }
            Ok(Err(e)) => {
                warn!("Existence check failed for schema {}: {}", schema, e);
                for step in steps {
                    outcomes.push(MigrationOutcome::new(
                        schema,
                        step.id(),
                        StepStatus::Failed,
                        Some(format!("schema existence check failed: {}", e)),
                    ));
                }
                return Ok(outcomes);
            }
        }

        let target = TenantTarget::new(schema.clone(), self.pool.clone());

        for step in steps {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                outcomes.push(MigrationOutcome::new(
                    schema,
                    step.id(),
                    StepStatus::Failed,
                    Some(format!("tenant deadline of {:?} exceeded", self.tenant_timeout)),
                ));
                break;
            }

            match timeout(remaining, self.execute_step(step.as_ref(), &target, mode)).await {
                Err(_) => {
                    // In-flight step fails with a timeout; abandon this
                    // tenant without affecting its siblings.
                    warn!("Step {} timed out on schema {}", step.id(), schema);
                    outcomes.push(MigrationOutcome::new(
                        schema,
                        step.id(),
                        StepStatus::Failed,
                        Some(format!("timed out after {:?}", self.tenant_timeout)),
                    ));
                    break;
                }
                Ok(Ok((status, detail))) => {
                    outcomes.push(MigrationOutcome::new(schema, step.id(), status, detail));
                }
                Ok(Err(StepError::Contract(detail))) => {
                    return Err(EngineError::Contract {
                        step_id: step.id().to_string(),
                        detail,
                    });
                }
                Ok(Err(e)) => {
                    // Contained: later steps on this tenant still run. A
                    // step depending on an earlier one's success must say
                    // so in its own check.
                    warn!("Step {} failed on schema {}: {}", step.id(), schema, e);
                    outcomes.push(MigrationOutcome::new(
                        schema,
                        step.id(),
                        StepStatus::Failed,
                        Some(e.to_string()),
                    ));
                }
            }
        }

        Ok(outcomes)
    }

    async fn execute_step(
        &self,
        step: &dyn MigrationStep,
        target: &TenantTarget,
        mode: RunMode,
    ) -> Result<(StepStatus, Option<String>), StepError> {
        match step.check(target).await? {
            CheckOutcome::AlreadyApplied => {
                Ok((StepStatus::Skipped, Some("already applied".to_string())))
            }
            CheckOutcome::SchemaLagging(reason) => Ok((StepStatus::Skipped, Some(reason))),
            CheckOutcome::NotApplied => match mode {
                RunMode::Status => Ok((StepStatus::Pending, None)),
                RunMode::Up => {
                    step.apply(target).await?;
                    Ok((StepStatus::Applied, None))
                }
            },
        }
    }
}
