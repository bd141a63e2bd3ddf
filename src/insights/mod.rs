//! Periodic insight digests over newly discovered edges

pub mod aggregator;

pub use aggregator::{type_pair_key, InsightAggregator, InsightError, EMPTY_PERIOD_SUMMARY};
