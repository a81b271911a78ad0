use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{derive_schema_name, SchemaNameError, TenantSchemaId};
use crate::database::manager;
use crate::database::models::{account::ROLE_TENANT_OWNER, Account};

/// Errors from the tenant directory
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Accounts store unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),

    #[error("Account {account_id} ({display_name:?}): {source}")]
    InvalidAccount {
        account_id: Uuid,
        display_name: String,
        #[source]
        source: SchemaNameError,
    },

    #[error("Schema collision: accounts {first} and {second} both map to schema \"{schema}\"")]
    SchemaCollision {
        schema: TenantSchemaId,
        first: Uuid,
        second: Uuid,
    },
}

/// One routable tenant: the owning account plus its resolved schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantRef {
    pub account_id: Uuid,
    pub display_name: String,
    pub schema: TenantSchemaId,
}

/// An account that could not be given a schema identity. Recorded, never
/// allowed to abort a bulk operation.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedAccount {
    pub account_id: Uuid,
    pub display_name: String,
    pub reason: String,
}

/// Routing table for the full tenant set, in directory order.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingTable {
    pub tenants: Vec<TenantRef>,
    pub rejected: Vec<RejectedAccount>,
}

/// Reconciliation diff between the authoritative account list and the
/// physical schemas present on the database server.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub routed: Vec<TenantRef>,
    /// Physical schemas no tenant-owner account maps to (e.g. orphaned by
    /// an account rename, or left behind by the legacy bare-key convention).
    pub orphan_schemas: Vec<String>,
    /// Accounts whose schema has not been provisioned yet.
    pub unprovisioned: Vec<TenantRef>,
}

/// Read access to the global accounts store.
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn list_tenant_owners(&self) -> Result<Vec<Account>, DirectoryError>;
    async fn get_account_by_id(&self, id: Uuid) -> Result<Option<Account>, DirectoryError>;
}

/// The seam consumed by the migration engine and the federated resolver:
/// the tenant list in directory order, plus schema existence probes.
#[async_trait]
pub trait TenantCatalog: Send + Sync {
    async fn list_tenants(&self) -> Result<Vec<TenantRef>, DirectoryError>;
    async fn schema_exists(&self, id: &TenantSchemaId) -> Result<bool, sqlx::Error>;
}

/// Accounts store backed by `public.accounts` in the platform database.
pub struct PgAccountSource {
    pool: PgPool,
}

impl PgAccountSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountSource for PgAccountSource {
    async fn list_tenant_owners(&self) -> Result<Vec<Account>, DirectoryError> {
        sqlx::query_as::<_, Account>(
            "SELECT id, display_name, account_key, role, schema_name, created_at, updated_at \
             FROM accounts \
             WHERE role = $1 AND account_key IS NOT NULL \
             ORDER BY created_at, id",
        )
        .bind(ROLE_TENANT_OWNER)
        .fetch_all(&self.pool)
        .await
        .map_err(DirectoryError::Unavailable)
    }

    async fn get_account_by_id(&self, id: Uuid) -> Result<Option<Account>, DirectoryError> {
        sqlx::query_as::<_, Account>(
            "SELECT id, display_name, account_key, role, schema_name, created_at, updated_at \
             FROM accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DirectoryError::Unavailable)
    }
}

/// Authoritative mapping from tenant-owner accounts to physical schemas.
///
/// The account list is the source of truth; catalog scans exist only for
/// reconciliation. Name-pattern matching alone is too fragile to route by.
pub struct TenantDirectory {
    accounts: Arc<dyn AccountSource>,
    pool: PgPool,
}

impl TenantDirectory {
    pub fn new(accounts: Arc<dyn AccountSource>, pool: PgPool) -> Self {
        Self { accounts, pool }
    }

    pub async fn list_tenant_owners(&self) -> Result<Vec<Account>, DirectoryError> {
        self.accounts.list_tenant_owners().await
    }

    pub async fn get_account(&self, id: Uuid) -> Result<Option<Account>, DirectoryError> {
        self.accounts.get_account_by_id(id).await
    }

    /// Resolve the schema identity for one account.
    ///
    /// The persisted `schema_name` (assigned at provisioning) wins when
    /// present; derivation from the display name is only the fallback for
    /// accounts that predate persistence. Re-deriving for an account that
    /// has since been renamed would silently route to a schema that does
    /// not exist.
    pub fn resolve_schema(&self, account: &Account) -> Result<TenantSchemaId, DirectoryError> {
        Self::resolve_schema_of(account)
    }

    fn resolve_schema_of(account: &Account) -> Result<TenantSchemaId, DirectoryError> {
        let resolved = if let Some(persisted) = account.schema_name.as_deref() {
            TenantSchemaId::parse(persisted)
        } else {
            match account.account_key.as_deref() {
                Some(key) => derive_schema_name(&account.display_name, key),
                None => Err(SchemaNameError::EmptyAccountKey),
            }
        };

        resolved.map_err(|source| DirectoryError::InvalidAccount {
            account_id: account.id,
            display_name: account.display_name.clone(),
            source,
        })
    }

    /// Build the full routing table.
    ///
    /// Accounts whose identity cannot be resolved are recorded and skipped.
    /// Two accounts mapping to the same schema is a configuration fault
    /// that would make routing ambiguous, so it fails the whole table.
    pub async fn routing_table(&self) -> Result<RoutingTable, DirectoryError> {
        let owners = self.accounts.list_tenant_owners().await?;

        let mut tenants = Vec::with_capacity(owners.len());
        let mut rejected = Vec::new();
        let mut seen: HashMap<TenantSchemaId, Uuid> = HashMap::new();

        for account in &owners {
            let schema = match Self::resolve_schema_of(account) {
                Ok(schema) => schema,
                Err(err) => {
                    warn!("Skipping account {}: {}", account.id, err);
                    rejected.push(RejectedAccount {
                        account_id: account.id,
                        display_name: account.display_name.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            if let Some(first) = seen.get(&schema) {
                return Err(DirectoryError::SchemaCollision {
                    schema,
                    first: *first,
                    second: account.id,
                });
            }
            seen.insert(schema.clone(), account.id);

            tenants.push(TenantRef {
                account_id: account.id,
                display_name: account.display_name.clone(),
                schema,
            });
        }

        debug!(
            "Routing table built: {} tenants, {} rejected",
            tenants.len(),
            rejected.len()
        );
        Ok(RoutingTable { tenants, rejected })
    }

    /// Enumerate physical schemas matching a LIKE pattern. Audit use only.
    pub async fn discover_physical_schemas(
        &self,
        pattern: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        manager::list_schemas(&self.pool, pattern)
            .await
            .map_err(DirectoryError::Unavailable)
    }

    /// Diff the authoritative routing table against the physical catalog.
    ///
    /// Scans every non-system schema, not just ones matching the current
    /// naming convention: legacy bare-key schemas carry no underscore and
    /// are precisely the orphans this report exists to surface.
    pub async fn reconcile(&self) -> Result<ReconcileReport, DirectoryError> {
        let table = self.routing_table().await?;
        let physical = self.discover_physical_schemas("%").await?;
        Ok(Self::diff(table.tenants, &physical))
    }

    fn diff(routed: Vec<TenantRef>, physical: &[String]) -> ReconcileReport {
        let mut orphan_schemas = Vec::new();
        for name in physical {
            if !routed.iter().any(|t| t.schema.as_str() == name) {
                orphan_schemas.push(name.clone());
            }
        }

        let mut unprovisioned = Vec::new();
        for tenant in &routed {
            if !physical.iter().any(|name| name == tenant.schema.as_str()) {
                unprovisioned.push(tenant.clone());
            }
        }

        ReconcileReport {
            routed,
            orphan_schemas,
            unprovisioned,
        }
    }
}

#[async_trait]
impl TenantCatalog for TenantDirectory {
    async fn list_tenants(&self) -> Result<Vec<TenantRef>, DirectoryError> {
        Ok(self.routing_table().await?.tenants)
    }

    async fn schema_exists(&self, id: &TenantSchemaId) -> Result<bool, sqlx::Error> {
        manager::schema_exists(&self.pool, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    struct StaticAccounts(Vec<Account>);

    #[async_trait]
    impl AccountSource for StaticAccounts {
        async fn list_tenant_owners(&self) -> Result<Vec<Account>, DirectoryError> {
            Ok(self.0.iter().filter(|a| a.is_tenant_owner()).cloned().collect())
        }

        async fn get_account_by_id(&self, id: Uuid) -> Result<Option<Account>, DirectoryError> {
            Ok(self.0.iter().find(|a| a.id == id).cloned())
        }
    }

    fn account(name: &str, key: &str) -> Account {
        Account {
            id: Uuid::new_v4(),
            display_name: name.to_string(),
            account_key: Some(key.to_string()),
            role: ROLE_TENANT_OWNER.to_string(),
            schema_name: None,
            created_at: NaiveDateTime::default(),
            updated_at: NaiveDateTime::default(),
        }
    }

    fn directory(accounts: Vec<Account>) -> TenantDirectory {
        // connect_lazy never touches the network; the catalog paths are not
        // exercised by these tests.
        let pool = PgPool::connect_lazy("postgres://localhost/milknet_test").unwrap();
        TenantDirectory::new(Arc::new(StaticAccounts(accounts)), pool)
    }

    #[tokio::test]
    async fn routing_table_preserves_directory_order() {
        let dir = directory(vec![account("Acme Dairy", "AC1"), account("Bell Milk", "BM2")]);
        let table = dir.routing_table().await.unwrap();
        assert_eq!(table.tenants.len(), 2);
        assert_eq!(table.tenants[0].schema.as_str(), "acmedairy_ac1");
        assert_eq!(table.tenants[1].schema.as_str(), "bellmilk_bm2");
        assert!(table.rejected.is_empty());
    }

    #[tokio::test]
    async fn persisted_schema_name_wins_over_derivation() {
        let mut acct = account("Renamed Dairy Co", "AC1");
        acct.schema_name = Some("acmedairy_ac1".to_string());
        let dir = directory(vec![acct]);
        let table = dir.routing_table().await.unwrap();
        assert_eq!(table.tenants[0].schema.as_str(), "acmedairy_ac1");
    }

    #[tokio::test]
    async fn colliding_accounts_fail_the_table() {
        let dir = directory(vec![account("Acme Dairy", "AC123"), account("Acme-Dairy!!", "AC123")]);
        match dir.routing_table().await {
            Err(DirectoryError::SchemaCollision { schema, .. }) => {
                assert_eq!(schema.as_str(), "acmedairy_ac123");
            }
            other => panic!("expected collision, got {:?}", other.map(|t| t.tenants)),
        }
    }

    #[tokio::test]
    async fn unusable_account_is_rejected_not_fatal() {
        let dir = directory(vec![account("!!##", "AC1"), account("Bell Milk", "BM2")]);
        let table = dir.routing_table().await.unwrap();
        assert_eq!(table.tenants.len(), 1);
        assert_eq!(table.rejected.len(), 1);
        assert_eq!(table.tenants[0].schema.as_str(), "bellmilk_bm2");
    }

    #[test]
    fn bare_key_legacy_schema_is_reported_as_orphan() {
        let routed = vec![TenantRef {
            account_id: Uuid::new_v4(),
            display_name: "Acme Dairy".to_string(),
            schema: TenantSchemaId::parse("acmedairy_ac1").unwrap(),
        }];
        // A legacy schema named after the bare account key, no underscore.
        let physical = vec!["acmedairy_ac1".to_string(), "ac123".to_string()];

        let report = TenantDirectory::diff(routed, &physical);
        assert_eq!(report.orphan_schemas, vec!["ac123".to_string()]);
        assert!(report.unprovisioned.is_empty());
    }

    #[test]
    fn missing_physical_schema_is_reported_as_unprovisioned() {
        let routed = vec![TenantRef {
            account_id: Uuid::new_v4(),
            display_name: "Bell Milk".to_string(),
            schema: TenantSchemaId::parse("bellmilk_bm2").unwrap(),
        }];

        let report = TenantDirectory::diff(routed, &[]);
        assert!(report.orphan_schemas.is_empty());
        assert_eq!(report.unprovisioned.len(), 1);
        assert_eq!(report.unprovisioned[0].schema.as_str(), "bellmilk_bm2");
    }

    #[tokio::test]
    async fn non_owner_accounts_are_not_listed() {
        let mut operator = account("Just An Operator", "OP1");
        operator.role = "operator".to_string();
        let dir = directory(vec![operator, account("Bell Milk", "BM2")]);
        let table = dir.routing_table().await.unwrap();
        assert_eq!(table.tenants.len(), 1);
    }
}
