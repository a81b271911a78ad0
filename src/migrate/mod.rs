pub mod engine;
pub mod step;
pub mod steps;

use serde::Serialize;

use crate::tenant::TenantSchemaId;

pub use engine::{EngineError, MigrationEngine, RunMode};
pub use step::{AddColumnStep, BackfillStep, CheckOutcome, CreateTableStep, MigrationStep, StepError, TenantTarget};
pub use steps::builtin_steps;

/// Final status of one (tenant, step) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Applied,
    Skipped,
    Failed,
    /// Only produced by status reports: the step has not run here yet.
    Pending,
}

/// Audit record for one step against one tenant.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationOutcome {
    pub tenant: TenantSchemaId,
    pub step_id: String,
    pub status: StepStatus,
    pub detail: Option<String>,
}

impl MigrationOutcome {
    fn new(
        tenant: &TenantSchemaId,
        step_id: &str,
        status: StepStatus,
        detail: Option<String>,
    ) -> Self {
        Self {
            tenant: tenant.clone(),
            step_id: step_id.to_string(),
            status,
            detail,
        }
    }
}

/// Complete report of one migration run across the tenant set.
///
/// Always complete: per-tenant failures are contained as outcomes, never
/// surfaced as errors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationRun {
    pub outcomes: Vec<MigrationOutcome>,
}

impl MigrationRun {
    pub fn count(&self, status: StepStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &MigrationOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == StepStatus::Failed)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} applied, {} skipped, {} failed, {} pending",
            self.count(StepStatus::Applied),
            self.count(StepStatus::Skipped),
            self.count(StepStatus::Failed),
            self.count(StepStatus::Pending),
        )
    }
}
