mod tokens;
mod usage;
mod budget;
mod checkpoint;

pub use tokens::{ApproxTokenEstimator, LedgerError, TokenCounter, TokenEstimator};
pub use usage::{Usage, UsageSink};
pub use budget::{BudgetStatus, TokenBudget};
pub use checkpoint::{Checkpoint, CheckpointLedger, PoppedSpan};
