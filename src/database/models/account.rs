use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Role value marking an account as the owner of a tenant schema.
pub const ROLE_TENANT_OWNER: &str = "tenant_owner";

/// A row from the global `public.accounts` table.
///
/// Read-only from the federation core's perspective; provisioning and
/// account management live elsewhere. `schema_name` is assigned once when
/// the tenant schema is provisioned and is authoritative from then on -
/// the derived name is only a fallback for accounts that predate the column.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub display_name: String,
    pub account_key: Option<String>,
    pub role: String,
    pub schema_name: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Account {
    pub fn is_tenant_owner(&self) -> bool {
        self.role == ROLE_TENANT_OWNER && self.account_key.is_some()
    }
}
