//! Cost ledger: per-invocation usage records and budget aggregates

pub mod models;
pub mod store;

pub use models::*;
pub use store::CostLedger;
