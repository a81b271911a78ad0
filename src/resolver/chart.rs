use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::database::manager::DatabaseManager;
use crate::database::models::{Channel, Machine, RateChart, RateRow};
use crate::tenant::TenantSchemaId;

/// Errors from chart-sharing resolution
#[derive(Debug, Error)]
pub enum ChartError {
    #[error("rate chart {0} not found")]
    NotFound(i64),

    /// A share pointing at another share. Disallowed at write time, so
    /// hitting one means the tenant's data is corrupt.
    #[error("chart {share} points at chart {master}, which is itself a share")]
    BrokenShare { share: i64, master: i64 },

    #[error("chart {share} references missing master chart {master}")]
    DanglingShare { share: i64, master: i64 },

    #[error("chart {0} still has {1} share(s) pointing at it")]
    HasShares(i64, usize),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Chart and download-history access inside one tenant schema.
#[async_trait]
pub trait ChartStore: Send + Sync {
    async fn fetch_chart(&self, id: i64) -> Result<Option<RateChart>, sqlx::Error>;
    /// All charts whose `shared_chart_id` equals `master_id`.
    async fn fetch_shares(&self, master_id: i64) -> Result<Vec<RateChart>, sqlx::Error>;
    /// Machines that downloaded any of `chart_ids` on `channel`, restricted
    /// to machines owned by one of `society_ids`.
    async fn machines_with_downloads(
        &self,
        chart_ids: &[i64],
        channel: Channel,
        society_ids: &[Uuid],
    ) -> Result<Vec<Machine>, sqlx::Error>;
    /// Rate rows owned by a chart. Non-empty only for masters.
    async fn fetch_rate_rows(&self, chart_id: i64) -> Result<Vec<RateRow>, sqlx::Error>;
    async fn delete_rate_rows(&self, chart_id: i64) -> Result<u64, sqlx::Error>;
    async fn delete_chart_row(&self, id: i64) -> Result<(), sqlx::Error>;
}

pub struct PgChartStore {
    schema: TenantSchemaId,
    pool: PgPool,
}

impl PgChartStore {
    pub fn new(schema: TenantSchemaId, pool: PgPool) -> Self {
        Self { schema, pool }
    }

    fn table(&self, name: &str) -> String {
        format!(
            "{}.{}",
            self.schema.quoted(),
            DatabaseManager::quote_identifier(name)
        )
    }
}

#[async_trait]
impl ChartStore for PgChartStore {
    async fn fetch_chart(&self, id: i64) -> Result<Option<RateChart>, sqlx::Error> {
        let sql = format!(
            "SELECT id, society_id, channel, shared_chart_id, record_count \
             FROM {} WHERE id = $1",
            self.table("rate_charts")
        );
        sqlx::query_as::<_, RateChart>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn fetch_shares(&self, master_id: i64) -> Result<Vec<RateChart>, sqlx::Error> {
        let sql = format!(
            "SELECT id, society_id, channel, shared_chart_id, record_count \
             FROM {} WHERE shared_chart_id = $1 ORDER BY id",
            self.table("rate_charts")
        );
        sqlx::query_as::<_, RateChart>(&sql)
            .bind(master_id)
            .fetch_all(&self.pool)
            .await
    }

    async fn machines_with_downloads(
        &self,
        chart_ids: &[i64],
        channel: Channel,
        society_ids: &[Uuid],
    ) -> Result<Vec<Machine>, sqlx::Error> {
        let sql = format!(
            "SELECT DISTINCT m.id, m.society_id, m.serial_no \
             FROM {} d JOIN {} m ON m.id = d.machine_id \
             WHERE d.chart_id = ANY($1) AND d.channel = $2 AND m.society_id = ANY($3) \
             ORDER BY m.serial_no",
            self.table("chart_downloads"),
            self.table("machines")
        );
        sqlx::query_as::<_, Machine>(&sql)
            .bind(chart_ids)
            .bind(channel)
            .bind(society_ids)
            .fetch_all(&self.pool)
            .await
    }

    async fn fetch_rate_rows(&self, chart_id: i64) -> Result<Vec<RateRow>, sqlx::Error> {
        let sql = format!(
            "SELECT chart_id, fat, snf, rate FROM {} \
             WHERE chart_id = $1 ORDER BY fat, snf",
            self.table("rate_rows")
        );
        sqlx::query_as::<_, RateRow>(&sql)
            .bind(chart_id)
            .fetch_all(&self.pool)
            .await
    }

    async fn delete_rate_rows(&self, chart_id: i64) -> Result<u64, sqlx::Error> {
        let sql = format!("DELETE FROM {} WHERE chart_id = $1", self.table("rate_rows"));
        let result = sqlx::query(&sql).bind(chart_id).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete_chart_row(&self, id: i64) -> Result<(), sqlx::Error> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table("rate_charts"));
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

/// Resolves the equivalence class of a rate chart (master plus all shares)
/// and what depends on it, within one already-known tenant schema.
pub struct ChartShareResolver {
    store: Arc<dyn ChartStore>,
}

impl ChartShareResolver {
    pub fn new(store: Arc<dyn ChartStore>) -> Self {
        Self { store }
    }

    /// The full set of charts representing one logical rate table.
    ///
    /// Resolving from any member - the master or any share - yields the
    /// identical set, which always contains the starting chart. Returned
    /// sorted by id.
    pub async fn resolve_equivalence_class(
        &self,
        chart_id: i64,
    ) -> Result<Vec<RateChart>, ChartError> {
        let chart = self
            .store
            .fetch_chart(chart_id)
            .await?
            .ok_or(ChartError::NotFound(chart_id))?;

        let master = match chart.shared_chart_id {
            None => chart,
            Some(master_id) => {
                let master = self
                    .store
                    .fetch_chart(master_id)
                    .await?
                    .ok_or(ChartError::DanglingShare {
                        share: chart.id,
                        master: master_id,
                    })?;
                if !master.is_master() {
                    return Err(ChartError::BrokenShare {
                        share: chart.id,
                        master: master_id,
                    });
                }
                master
            }
        };

        let master_id = master.id;
        let mut class = vec![master];
        class.extend(self.store.fetch_shares(master_id).await?);

        let mut seen = HashSet::new();
        class.retain(|c| seen.insert(c.id));
        class.sort_by_key(|c| c.id);
        Ok(class)
    }

    /// Machines that have fetched any member of the chart's equivalence
    /// class on the given channel. Restricted to machines belonging to one
    /// of the class's societies and de-duplicated by machine id.
    pub async fn downloading_devices(
        &self,
        chart_id: i64,
        channel: Channel,
    ) -> Result<Vec<Machine>, ChartError> {
        let class = self.resolve_equivalence_class(chart_id).await?;

        let chart_ids: Vec<i64> = class.iter().map(|c| c.id).collect();
        let society_ids: Vec<Uuid> = {
            let mut ids: Vec<Uuid> = class.iter().map(|c| c.society_id).collect();
            ids.sort();
            ids.dedup();
            ids
        };

        let mut machines = self
            .store
            .machines_with_downloads(&chart_ids, channel, &society_ids)
            .await?;

        let mut seen = HashSet::new();
        machines.retain(|m| seen.insert(m.id));
        Ok(machines)
    }

    /// The rate grid a chart actually prices with: its own rows for a
    /// master, the master's rows when read through a share pointer.
    pub async fn effective_rate_rows(&self, chart_id: i64) -> Result<Vec<RateRow>, ChartError> {
        let chart = self
            .store
            .fetch_chart(chart_id)
            .await?
            .ok_or(ChartError::NotFound(chart_id))?;
        Ok(self.store.fetch_rate_rows(chart.master_id()).await?)
    }

    /// Delete a chart. Shares own no rate rows; masters cascade to theirs,
    /// but only once no share points at them anymore.
    pub async fn delete_chart(&self, chart_id: i64) -> Result<(), ChartError> {
        let chart = self
            .store
            .fetch_chart(chart_id)
            .await?
            .ok_or(ChartError::NotFound(chart_id))?;

        if chart.is_master() {
            let shares = self.store.fetch_shares(chart.id).await?;
            if !shares.is_empty() {
                return Err(ChartError::HasShares(chart.id, shares.len()));
            }
            let removed = self.store.delete_rate_rows(chart.id).await?;
            info!("Deleted {} rate rows owned by chart {}", removed, chart.id);
        }

        self.store.delete_chart_row(chart.id).await?;
        info!("Deleted rate chart {}", chart.id);
        Ok(())
    }
}
