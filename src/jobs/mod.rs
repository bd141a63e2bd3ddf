//! Background jobs and the service facade they share

pub mod debouncer;
pub mod scheduler;
pub mod service;

pub use debouncer::DiscoveryDebouncer;
pub use scheduler::{next_daily, next_weekly, ScheduleConfig, Scheduler};
pub use service::{DiscoveryRunner, DiscoveryService, ProviderCheck, RunState, RunStatus};
