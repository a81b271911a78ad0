pub mod account;
pub mod chart;
pub mod entity;

pub use account::Account;
pub use chart::{Channel, Machine, RateChart, RateRow};
pub use entity::{Entity, EntityType};
