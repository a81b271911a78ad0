use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The entity tables searched by a federated contact lookup, in priority
/// order. The order is part of the platform's contract: when one address
/// appears in more than one table, the earlier type wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Society,
    Farmer,
    Bmc,
    Dairy,
}

impl EntityType {
    /// Fixed search priority for federated lookups.
    pub const PRIORITY: [EntityType; 4] = [
        EntityType::Society,
        EntityType::Farmer,
        EntityType::Bmc,
        EntityType::Dairy,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            EntityType::Society => "societies",
            EntityType::Farmer => "farmers",
            EntityType::Bmc => "bmcs",
            EntityType::Dairy => "dairies",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityType::Society => "society",
            EntityType::Farmer => "farmer",
            EntityType::Bmc => "bmc",
            EntityType::Dairy => "dairy",
        };
        f.write_str(name)
    }
}

/// One row from any of the four entity tables. All four share this shape
/// for lookup purposes; `parent_ref` is the owning society/bmc where the
/// hierarchy has one (farmers and bmcs), NULL at the top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Entity {
    pub id: Uuid,
    pub name: String,
    pub contact_address: String,
    pub parent_ref: Option<Uuid>,
}
