use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Milk channel a rate chart prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Cow,
    Buffalo,
    Mixed,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Cow => "COW",
            Channel::Buffalo => "BUFFALO",
            Channel::Mixed => "MIXED",
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "COW" => Ok(Channel::Cow),
            "BUFFALO" => Ok(Channel::Buffalo),
            "MIXED" => Ok(Channel::Mixed),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// A rate chart header row from `<schema>.rate_charts`.
///
/// A chart either owns its rate rows (master, `shared_chart_id` NULL) or
/// points at another chart's rows (share). A share must point at a master -
/// one level of indirection only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RateChart {
    pub id: i64,
    pub society_id: Uuid,
    pub channel: Channel,
    pub shared_chart_id: Option<i64>,
    pub record_count: i64,
}

impl RateChart {
    pub fn is_master(&self) -> bool {
        self.shared_chart_id.is_none()
    }

    /// Id of the master this chart's data lives under (itself if master).
    pub fn master_id(&self) -> i64 {
        self.shared_chart_id.unwrap_or(self.id)
    }
}

/// One fat/SNF cell of a master chart's rate grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RateRow {
    pub chart_id: i64,
    pub fat: Decimal,
    pub snf: Decimal,
    pub rate: Decimal,
}

/// A field collection machine, owned by one society.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Machine {
    pub id: Uuid,
    pub society_id: Uuid,
    pub serial_no: String,
}
