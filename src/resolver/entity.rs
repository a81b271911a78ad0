use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::config::config;
use crate::database::manager::DatabaseManager;
use crate::database::models::{Entity, EntityType};
use crate::tenant::directory::{DirectoryError, TenantCatalog, TenantRef};
use crate::tenant::TenantSchemaId;

/// Errors from a federated lookup. "No match" is a normal result, not an
/// error; only directory unavailability aborts a lookup.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// A federated lookup hit: the entity plus where it lives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FederatedMatch {
    pub tenant: TenantRef,
    pub entity_type: EntityType,
    pub entity: Entity,
}

/// Exact-match entity lookup inside one tenant schema.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find_by_contact(
        &self,
        schema: &TenantSchemaId,
        entity_type: EntityType,
        address: &str,
    ) -> Result<Option<Entity>, sqlx::Error>;
}

pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn find_by_contact(
        &self,
        schema: &TenantSchemaId,
        entity_type: EntityType,
        address: &str,
    ) -> Result<Option<Entity>, sqlx::Error> {
        let sql = format!(
            "SELECT id, name, contact_address, parent_ref FROM {}.{} \
             WHERE lower(btrim(contact_address)) = $1 LIMIT 1",
            schema.quoted(),
            DatabaseManager::quote_identifier(entity_type.table_name())
        );
        sqlx::query_as::<_, Entity>(&sql)
            .bind(address)
            .fetch_optional(&self.pool)
            .await
    }
}

/// Canonical form used for contact-address comparison.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Federated lookup of an entity by a global contact address.
///
/// A linear scan over (tenants x entity types) with no cross-tenant index;
/// fine at the current tenant counts, a known ceiling beyond that. The
/// resolver is a pure query: any OTP or session state built on a match
/// belongs to the caller.
pub struct EntityResolver {
    catalog: Arc<dyn TenantCatalog>,
    store: Arc<dyn EntityStore>,
    scan_concurrency: usize,
}

impl EntityResolver {
    pub fn new(catalog: Arc<dyn TenantCatalog>, store: Arc<dyn EntityStore>) -> Self {
        Self {
            catalog,
            store,
            scan_concurrency: config().resolver.scan_concurrency,
        }
    }

    pub fn with_scan_concurrency(mut self, concurrency: usize) -> Self {
        self.scan_concurrency = concurrency.max(1);
        self
    }

    /// Find the unique entity a contact address belongs to.
    ///
    /// Tenants are scanned in directory order; within a tenant, entity
    /// tables in fixed priority order (society, farmer, bmc, dairy). The
    /// first match under that ordering wins. Tenant probes run a few at a
    /// time for latency, but `buffered` preserves stream order, so the
    /// winner never depends on which probe finishes first.
    pub async fn find_by_contact_address(
        &self,
        address: &str,
    ) -> Result<Option<FederatedMatch>, ResolveError> {
        let address = normalize_address(address);
        if address.is_empty() {
            return Ok(None);
        }

        let tenants = self.catalog.list_tenants().await?;

        let mut scans = stream::iter(tenants.into_iter())
            .map(|tenant| {
                let store = Arc::clone(&self.store);
                let address = address.clone();
                async move {
                    let found = scan_tenant(store.as_ref(), &tenant, &address).await;
                    (tenant, found)
                }
            })
            .buffered(self.scan_concurrency);

        while let Some((tenant, found)) = scans.next().await {
            if let Some((entity_type, entity)) = found {
                debug!(
                    "Contact address resolved to {} {} in schema {}",
                    entity_type, entity.id, tenant.schema
                );
                return Ok(Some(FederatedMatch {
                    tenant,
                    entity_type,
                    entity,
                }));
            }
        }

        Ok(None)
    }
}

/// Probe one tenant's entity tables in priority order. Query errors (e.g.
/// a missing table in a partially-migrated schema) are treated as "no
/// match here" so the federated scan never aborts on one bad tenant.
async fn scan_tenant(
    store: &dyn EntityStore,
    tenant: &TenantRef,
    address: &str,
) -> Option<(EntityType, Entity)> {
    for entity_type in EntityType::PRIORITY {
        match store.find_by_contact(&tenant.schema, entity_type, address).await {
            Ok(Some(entity)) => return Some((entity_type, entity)),
            Ok(None) => {}
            Err(e) => {
                debug!(
                    "Lookup in {}.{} failed, treating as no match: {}",
                    tenant.schema,
                    entity_type.table_name(),
                    e
                );
            }
        }
    }
    None
}
