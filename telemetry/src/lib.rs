mod collector;

pub use collector::{TokenUsage, UsageCollector};
