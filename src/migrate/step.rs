use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use crate::database::manager::{self, DatabaseManager};
use crate::tenant::TenantSchemaId;

/// Errors from a migration step's check or apply against one tenant
#[derive(Debug, Error)]
pub enum StepError {
    /// Malformed step definition. The only variant the engine lets escape
    /// a run; everything else is contained as a Failed outcome.
    #[error("step contract violation: {0}")]
    Contract(String),

    /// The schema is in a state the step recognizes as neither "done" nor
    /// "pending", e.g. a column present with the wrong type. Never coerced.
    #[error("unexpected schema state: {0}")]
    UnexpectedState(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Result of probing one tenant for a step's precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    AlreadyApplied,
    NotApplied,
    /// The tenant lacks the base object the step builds on (e.g. the table
    /// an added column belongs to). Recorded as Skipped, not Failed: such
    /// tenants are behind, not broken.
    SchemaLagging(String),
}

/// One tenant schema as seen by a step: the resolved identifier plus a
/// handle on the shared pool. Connections are acquired per statement and
/// never held across another tenant's work.
#[derive(Clone)]
pub struct TenantTarget {
    pub schema: TenantSchemaId,
    pub pool: PgPool,
}

impl TenantTarget {
    pub fn new(schema: TenantSchemaId, pool: PgPool) -> Self {
        Self { schema, pool }
    }

    /// Fully qualified, quoted table reference inside this tenant's schema.
    pub fn table(&self, name: &str) -> String {
        format!(
            "{}.{}",
            self.schema.quoted(),
            DatabaseManager::quote_identifier(name)
        )
    }
}

/// One idempotent schema- or data-change operation.
///
/// `check` is consulted before every `apply`; implementations must treat
/// "already in the desired state" and "absent but should exist" as the only
/// two normal branches and surface anything else as an error.
#[async_trait]
pub trait MigrationStep: Send + Sync {
    fn id(&self) -> &str;
    fn description(&self) -> &str;
    async fn check(&self, target: &TenantTarget) -> Result<CheckOutcome, StepError>;
    async fn apply(&self, target: &TenantTarget) -> Result<(), StepError>;
}

fn validate_identifier(step_id: &str, what: &str, value: &str) -> Result<(), StepError> {
    if value.is_empty()
        || !value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(StepError::Contract(format!(
            "step {}: {} {:?} is not a valid identifier",
            step_id, what, value
        )));
    }
    Ok(())
}

/// ALTER TABLE ... ADD COLUMN, guarded by information_schema.
pub struct AddColumnStep {
    id: String,
    description: String,
    table: String,
    column: String,
    /// Type as written in DDL, e.g. `numeric(10,2)`.
    ddl_type: String,
    /// Type as reported by information_schema.columns.data_type.
    expected_type: String,
}

impl AddColumnStep {
    pub fn new(
        id: &str,
        description: &str,
        table: &str,
        column: &str,
        ddl_type: &str,
        expected_type: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            ddl_type: ddl_type.to_string(),
            expected_type: expected_type.to_string(),
        }
    }
}

#[async_trait]
impl MigrationStep for AddColumnStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn check(&self, target: &TenantTarget) -> Result<CheckOutcome, StepError> {
        validate_identifier(&self.id, "table", &self.table)?;
        validate_identifier(&self.id, "column", &self.column)?;

        if !manager::table_exists(&target.pool, &target.schema, &self.table).await? {
            return Ok(CheckOutcome::SchemaLagging(format!(
                "table {:?} does not exist",
                self.table
            )));
        }

        match manager::column_type(&target.pool, &target.schema, &self.table, &self.column).await? {
            None => Ok(CheckOutcome::NotApplied),
            Some(found) if found.eq_ignore_ascii_case(&self.expected_type) => {
                Ok(CheckOutcome::AlreadyApplied)
            }
            Some(found) => Err(StepError::UnexpectedState(format!(
                "{}.{} exists with type {:?}, expected {:?}",
                self.table, self.column, found, self.expected_type
            ))),
        }
    }

    async fn apply(&self, target: &TenantTarget) -> Result<(), StepError> {
        let ddl = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            target.table(&self.table),
            DatabaseManager::quote_identifier(&self.column),
            self.ddl_type
        );

        let mut tx = target.pool.begin().await?;
        sqlx::query(&ddl).execute(&mut *tx).await?;
        tx.commit().await?;

        info!(
            "Added column {}.{} to schema {}",
            self.table, self.column, target.schema
        );
        Ok(())
    }
}

/// CREATE TABLE when absent.
pub struct CreateTableStep {
    id: String,
    description: String,
    table: String,
    /// Column/constraint list, the part between the parentheses.
    body: String,
}

impl CreateTableStep {
    pub fn new(id: &str, description: &str, table: &str, body: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            table: table.to_string(),
            body: body.to_string(),
        }
    }
}

#[async_trait]
impl MigrationStep for CreateTableStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn check(&self, target: &TenantTarget) -> Result<CheckOutcome, StepError> {
        validate_identifier(&self.id, "table", &self.table)?;
        if self.body.trim().is_empty() {
            return Err(StepError::Contract(format!(
                "step {}: empty table body",
                self.id
            )));
        }

        if manager::table_exists(&target.pool, &target.schema, &self.table).await? {
            Ok(CheckOutcome::AlreadyApplied)
        } else {
            Ok(CheckOutcome::NotApplied)
        }
    }

    async fn apply(&self, target: &TenantTarget) -> Result<(), StepError> {
        let ddl = format!("CREATE TABLE {} ({})", target.table(&self.table), self.body);

        let mut tx = target.pool.begin().await?;
        sqlx::query(&ddl).execute(&mut *tx).await?;
        tx.commit().await?;

        info!("Created table {} in schema {}", self.table, target.schema);
        Ok(())
    }
}

/// UPDATE-style data backfill, guarded by a rows-pending count.
pub struct BackfillStep {
    id: String,
    description: String,
    table: String,
    set_clause: String,
    where_clause: String,
}

impl BackfillStep {
    pub fn new(
        id: &str,
        description: &str,
        table: &str,
        set_clause: &str,
        where_clause: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            table: table.to_string(),
            set_clause: set_clause.to_string(),
            where_clause: where_clause.to_string(),
        }
    }
}

#[async_trait]
impl MigrationStep for BackfillStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn check(&self, target: &TenantTarget) -> Result<CheckOutcome, StepError> {
        validate_identifier(&self.id, "table", &self.table)?;

        if !manager::table_exists(&target.pool, &target.schema, &self.table).await? {
            return Ok(CheckOutcome::SchemaLagging(format!(
                "table {:?} does not exist",
                self.table
            )));
        }

        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            target.table(&self.table),
            self.where_clause
        );
        let pending: (i64,) = sqlx::query_as(&sql).fetch_one(&target.pool).await?;

        if pending.0 == 0 {
            Ok(CheckOutcome::AlreadyApplied)
        } else {
            Ok(CheckOutcome::NotApplied)
        }
    }

    async fn apply(&self, target: &TenantTarget) -> Result<(), StepError> {
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            target.table(&self.table),
            self.set_clause,
            self.where_clause
        );

        let mut tx = target.pool.begin().await?;
        let result = sqlx::query(&sql).execute(&mut *tx).await?;
        tx.commit().await?;

        info!(
            "Backfilled {} rows in {} for schema {}",
            result.rows_affected(),
            self.table,
            target.schema
        );
        Ok(())
    }
}
