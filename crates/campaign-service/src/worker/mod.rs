//! 后台 Worker

pub mod daily_scheduler;

pub use daily_scheduler::{DailyScheduler, TickSummary};
