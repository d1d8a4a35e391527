pub mod database_ops;
pub mod normalization;
pub mod orchestrator;
pub mod record;
pub mod tracing;

pub mod util {
    pub mod db;
    pub mod env;
}

pub use database_ops::metro::{MetroApi, MetroClient, MetroConfig};
pub use orchestrator::{LoadSettings, RunSummary};
pub use record::FlatProductRecord;
pub use util::db::Db;
