pub mod cli;
pub mod config;
pub mod database;
pub mod migrate;
pub mod resolver;
pub mod tenant;
