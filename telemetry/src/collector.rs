use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ledger::{Usage, UsageSink};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Input and output tokens spent on one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub model: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone)]
struct UsageRecord {
    model: String,
    usage: Usage,
}

/// Append-only usage log shared between exchanges.
///
/// Records are kept as reported and only aggregated when read, so a
/// provider that omits a field does not skew the other fields.
#[derive(Debug, Default)]
pub struct UsageCollector {
    records: Mutex<Vec<UsageRecord>>,
}

impl UsageCollector {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    // A panic elsewhere cannot leave a half-pushed record behind.
    fn records(&self) -> MutexGuard<'_, Vec<UsageRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_count(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Total tokens per model. Calls that reported no total are skipped.
    pub fn token_count_by_model(&self) -> HashMap<String, usize> {
        let mut totals = HashMap::new();
        for record in self.records().iter() {
            if let Some(total) = record.usage.total_tokens {
                *totals.entry(record.model.clone()).or_insert(0) += total;
            }
        }
        totals
    }

    /// Input/output split per model, ordered by model name.
    pub fn token_usage_by_model(&self) -> Vec<TokenUsage> {
        let mut by_model: BTreeMap<String, TokenUsage> = BTreeMap::new();
        for record in self.records().iter() {
            let entry = by_model
                .entry(record.model.clone())
                .or_insert_with(|| TokenUsage::new(&record.model));
            entry.input_tokens += record.usage.input_tokens.unwrap_or(0);
            entry.output_tokens += record.usage.output_tokens.unwrap_or(0);
        }
        by_model.into_values().collect()
    }

    pub fn clear(&self) {
        self.records().clear();
    }
}

impl UsageSink for UsageCollector {
    fn collect(&self, model: &str, usage: &Usage) {
        trace!(model, total = ?usage.total_tokens, "collecting usage");
        self.records().push(UsageRecord {
            model: model.to_string(),
            usage: *usage,
        });
    }
}
