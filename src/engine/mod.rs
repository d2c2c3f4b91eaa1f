//! Run orchestration — sources → store → notifier → analytics.

pub mod notifier;
pub mod pipeline;
pub mod sample;
