use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::usage::Usage;

/// Marginal token cost of one model turn over the messages
/// `[start_index, end_index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub start_index: usize,
    pub end_index: usize,
    pub token_count: usize,
    #[serde(default)]
    pub latest_generated_tokens: usize,
}

impl Checkpoint {
    pub fn new(start_index: usize, end_index: usize, token_count: usize) -> Self {
        Self {
            start_index,
            end_index,
            token_count,
            latest_generated_tokens: 0,
        }
    }

    pub fn with_generated(mut self, tokens: usize) -> Self {
        self.latest_generated_tokens = tokens;
        self
    }

    /// Number of messages in the span.
    pub fn len(&self) -> usize {
        self.end_index.saturating_sub(self.start_index)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a front eviction took out of the message list.
#[derive(Debug, Clone, PartialEq)]
pub struct PoppedSpan<T> {
    pub messages: Vec<T>,
    /// The checkpoint as it was before the pop.
    pub checkpoint: Checkpoint,
}

/// Ordered checkpoints tiling the message list from index 0.
///
/// The ledger never owns the messages; every operation that moves indices
/// takes the list it describes so both stay in step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointLedger {
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointLedger {
    pub fn new() -> Self {
        Self {
            checkpoints: Vec::new(),
        }
    }

    pub fn from_checkpoints(checkpoints: Vec<Checkpoint>) -> Self {
        Self { checkpoints }
    }

    pub fn as_slice(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Checkpoint> {
        self.checkpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn first(&self) -> Option<&Checkpoint> {
        self.checkpoints.first()
    }

    pub fn last(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    pub fn total_tokens(&self) -> usize {
        self.checkpoints.iter().map(|cp| cp.token_count).sum()
    }

    /// First message index not yet attributed to any checkpoint.
    pub fn end_index(&self) -> usize {
        self.checkpoints.last().map(|cp| cp.end_index).unwrap_or(0)
    }

    /// Records the turn that just brought the message list to
    /// `message_count` entries.
    ///
    /// Providers report the whole prompt on every call, so each checkpoint
    /// stores only what this turn added on top of the ones before it.
    pub fn append(&mut self, usage: &Usage, message_count: usize) -> &Checkpoint {
        let total = usage.total();
        let token_count = if self.checkpoints.is_empty() {
            total
        } else {
            let counted = self.total_tokens();
            if total < counted {
                warn!(
                    reported = total,
                    counted, "provider reported fewer tokens than already tracked"
                );
            }
            total.saturating_sub(counted)
        };

        self.checkpoints.push(Checkpoint {
            start_index: self.end_index(),
            end_index: message_count,
            token_count,
            latest_generated_tokens: usage.generated(),
        });

        &self.checkpoints[self.checkpoints.len() - 1]
    }

    /// Evicts the oldest checkpoint together with its messages.
    ///
    /// With `exclude_last` the final message of the span survives: it stays
    /// at index 0 under a `[0, 1)` checkpoint that only carries the tokens
    /// generated for it.
    pub fn pop_front<T>(
        &mut self,
        messages: &mut Vec<T>,
        exclude_last: bool,
    ) -> Option<PoppedSpan<T>> {
        if self.checkpoints.is_empty() {
            return None;
        }

        let popped = self.checkpoints.remove(0);
        let keep = usize::from(exclude_last);
        let removed = popped.len().saturating_sub(keep).min(messages.len());
        let evicted: Vec<T> = messages.drain(..removed).collect();

        for cp in &mut self.checkpoints {
            cp.start_index = cp.start_index.saturating_sub(removed);
            cp.end_index = cp.end_index.saturating_sub(removed);
        }

        if exclude_last {
            self.checkpoints.insert(
                0,
                Checkpoint {
                    start_index: 0,
                    end_index: keep,
                    token_count: popped.latest_generated_tokens,
                    latest_generated_tokens: popped.latest_generated_tokens,
                },
            );
        }

        Some(PoppedSpan {
            messages: evicted,
            checkpoint: popped,
        })
    }

    /// Inserts a `[0, 1)` checkpoint for a message placed at the front of
    /// the list, shifting every other span by one.
    pub fn prepend(&mut self, token_count: usize, latest_generated_tokens: usize) {
        for cp in &mut self.checkpoints {
            cp.start_index += 1;
            cp.end_index += 1;
        }

        self.checkpoints.insert(
            0,
            Checkpoint {
                start_index: 0,
                end_index: 1,
                token_count,
                latest_generated_tokens,
            },
        );
    }

    /// Adds tokens to the oldest checkpoint. Returns false on an empty ledger.
    pub fn charge_front(&mut self, tokens: usize) -> bool {
        match self.checkpoints.first_mut() {
            Some(cp) => {
                cp.token_count += tokens;
                true
            }
            None => false,
        }
    }

    /// True when the spans tile `[0, end)` without gaps or overlaps and stay
    /// within a list of `message_count` messages.
    pub fn covers(&self, message_count: usize) -> bool {
        let mut expected_start = 0;
        for cp in &self.checkpoints {
            if cp.start_index != expected_start || cp.end_index < cp.start_index {
                return false;
            }
            expected_start = cp.end_index;
        }
        expected_start <= message_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_of(checkpoints: &[(usize, usize, usize, usize)]) -> CheckpointLedger {
        CheckpointLedger::from_checkpoints(
            checkpoints
                .iter()
                .map(|&(start, end, tokens, generated)| {
                    Checkpoint::new(start, end, tokens).with_generated(generated)
                })
                .collect(),
        )
    }

    #[test]
    fn test_first_append_takes_full_total() {
        let mut ledger = CheckpointLedger::new();
        let cp = *ledger.append(&Usage::from_counts(120, 30), 2);

        assert_eq!(cp.start_index, 0);
        assert_eq!(cp.end_index, 2);
        assert_eq!(cp.token_count, 150);
        assert_eq!(cp.latest_generated_tokens, 30);
    }

    #[test]
    fn test_append_records_marginal_cost() {
        let mut ledger = CheckpointLedger::new();
        ledger.append(&Usage::from_counts(120, 30), 2);
        let cp = *ledger.append(&Usage::from_counts(190, 40), 4);

        assert_eq!(cp.start_index, 2);
        assert_eq!(cp.end_index, 4);
        assert_eq!(cp.token_count, 80);
        assert_eq!(ledger.total_tokens(), 230);
        assert!(ledger.covers(4));
    }

    #[test]
    fn test_append_never_goes_negative() {
        let mut ledger = CheckpointLedger::new();
        ledger.append(&Usage::from_counts(500, 0), 2);
        let cp = *ledger.append(&Usage::from_counts(100, 10), 4);
        assert_eq!(cp.token_count, 0);
    }

    #[test]
    fn test_pop_front_drops_first_span() {
        let mut ledger = ledger_of(&[(0, 4, 150, 0), (4, 6, 70, 0)]);
        let mut messages = vec!["a", "b", "c", "d", "e", "f"];

        let popped = ledger.pop_front(&mut messages, false).unwrap();

        assert_eq!(popped.messages, vec!["a", "b", "c", "d"]);
        assert_eq!(popped.checkpoint.token_count, 150);
        assert_eq!(ledger.as_slice(), &[Checkpoint::new(0, 2, 70)]);
        assert_eq!(messages, vec!["e", "f"]);
    }

    #[test]
    fn test_pop_front_rebases_by_removed_count() {
        let mut ledger = ledger_of(&[(0, 3, 100, 10), (3, 5, 50, 5), (5, 7, 40, 4)]);
        let mut messages: Vec<usize> = (0..8).collect();

        ledger.pop_front(&mut messages, false);

        let spans: Vec<_> = ledger.iter().map(|cp| (cp.start_index, cp.end_index)).collect();
        assert_eq!(spans, vec![(0, 2), (2, 4)]);
        assert_eq!(messages, vec![3, 4, 5, 6, 7]);
        assert!(ledger.covers(messages.len()));
    }

    #[test]
    fn test_pop_front_exclude_last_keeps_final_message() {
        let mut ledger = ledger_of(&[(0, 3, 100, 25), (3, 5, 50, 5)]);
        let mut messages = vec!["u1", "a1", "u2", "a2", "u3"];

        let popped = ledger.pop_front(&mut messages, true).unwrap();

        assert_eq!(popped.messages, vec!["u1", "a1"]);
        assert_eq!(messages, vec!["u2", "a2", "u3"]);
        assert_eq!(
            ledger.as_slice(),
            &[
                Checkpoint::new(0, 1, 25).with_generated(25),
                Checkpoint::new(1, 3, 50).with_generated(5),
            ]
        );
        assert!(ledger.covers(messages.len()));
    }

    #[test]
    fn test_pop_front_empty_ledger() {
        let mut ledger = CheckpointLedger::new();
        let mut messages = vec![1, 2];
        assert!(ledger.pop_front(&mut messages, false).is_none());
        assert_eq!(messages, vec![1, 2]);
    }

    #[test]
    fn test_pop_front_leaves_pending_messages() {
        let mut ledger = ledger_of(&[(0, 2, 100, 10)]);
        let mut messages = vec!["u1", "a1", "u2"];

        ledger.pop_front(&mut messages, false);

        assert!(ledger.is_empty());
        assert_eq!(messages, vec!["u2"]);
    }

    #[test]
    fn test_prepend_shifts_spans() {
        let mut ledger = ledger_of(&[(0, 2, 70, 7)]);
        ledger.prepend(40, 30);

        assert_eq!(
            ledger.as_slice(),
            &[
                Checkpoint::new(0, 1, 40).with_generated(30),
                Checkpoint::new(1, 3, 70).with_generated(7),
            ]
        );
        assert!(ledger.covers(3));
    }

    #[test]
    fn test_charge_front() {
        let mut ledger = ledger_of(&[(0, 2, 70, 7)]);
        assert!(ledger.charge_front(12));
        assert_eq!(ledger.total_tokens(), 82);
        assert!(!CheckpointLedger::new().charge_front(12));
    }

    #[test]
    fn test_covers_detects_gaps_and_overruns() {
        assert!(ledger_of(&[(0, 2, 1, 0), (2, 4, 1, 0)]).covers(5));
        assert!(!ledger_of(&[(0, 2, 1, 0), (3, 4, 1, 0)]).covers(5));
        assert!(!ledger_of(&[(1, 2, 1, 0)]).covers(5));
        assert!(!ledger_of(&[(0, 6, 1, 0)]).covers(5));
    }

    #[test]
    fn test_ledger_serializes_as_list() {
        let ledger = ledger_of(&[(0, 2, 70, 7)]);
        let json = serde_json::to_string(&ledger).unwrap();
        assert!(json.starts_with('['));
        let parsed: CheckpointLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ledger);
    }
}
