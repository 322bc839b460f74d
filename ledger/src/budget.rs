use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointLedger;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Healthy,
    Warning { remaining: usize },
    Critical { remaining: usize },
    /// More tokens are tracked than the context allows. Moderators never
    /// drop the newest turn, so a single oversized turn ends up here.
    Exceeded { over_by: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudget {
    pub budget: usize,
    pub used: usize,
    pub warning_threshold: f32,
    pub critical_threshold: f32,
}

impl TokenBudget {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            used: 0,
            warning_threshold: 0.75,
            critical_threshold: 0.9,
        }
    }

    /// Budget pre-filled with everything the ledger currently tracks.
    pub fn for_ledger(ledger: &CheckpointLedger, budget: usize) -> Self {
        let mut this = Self::new(budget);
        this.record(ledger.total_tokens());
        this
    }

    pub fn with_thresholds(mut self, warning: f32, critical: f32) -> Self {
        self.warning_threshold = warning;
        self.critical_threshold = critical;
        self
    }

    pub fn record(&mut self, tokens: usize) {
        self.used += tokens;
    }

    pub fn remaining(&self) -> usize {
        self.budget.saturating_sub(self.used)
    }

    pub fn usage_ratio(&self) -> f32 {
        if self.budget == 0 {
            return 1.0;
        }
        self.used as f32 / self.budget as f32
    }

    pub fn status(&self) -> BudgetStatus {
        if self.used > self.budget {
            return BudgetStatus::Exceeded {
                over_by: self.used - self.budget,
            };
        }

        let ratio = self.usage_ratio();
        let remaining = self.remaining();

        if ratio >= self.critical_threshold {
            BudgetStatus::Critical { remaining }
        } else if ratio >= self.warning_threshold {
            BudgetStatus::Warning { remaining }
        } else {
            BudgetStatus::Healthy
        }
    }
}
