pub mod chart;
pub mod entity;

pub use chart::{ChartError, ChartShareResolver, ChartStore, PgChartStore};
pub use entity::{EntityResolver, EntityStore, FederatedMatch, PgEntityStore, ResolveError};
