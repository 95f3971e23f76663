//! Push delivery engine: claims jobs from the notification queue and drives
//! them through policy, composition and delivery.

pub mod cache;
pub mod composer;
pub mod dedup;
pub mod ingest;
pub mod postgres;
pub mod processor;
pub mod quiet_hours;
pub mod reciprocal;
pub mod repository;
pub mod retry;
pub mod scheduler;
pub mod tokens;

pub use processor::{NotificationQueueProcessor, ProcessorConfig, SweepReport};
pub use scheduler::SweepScheduler;
