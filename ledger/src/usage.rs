use serde::{Deserialize, Serialize};

/// Token usage reported by a provider for one completion.
///
/// Every field is optional because not every backend reports all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: Option<usize>,
    #[serde(default)]
    pub output_tokens: Option<usize>,
    #[serde(default)]
    pub total_tokens: Option<usize>,
}

impl Usage {
    /// Builds a usage record, deriving `total_tokens` from input and output
    /// when the provider did not send it.
    pub fn new(
        input_tokens: Option<usize>,
        output_tokens: Option<usize>,
        total_tokens: Option<usize>,
    ) -> Self {
        let total_tokens = match (total_tokens, input_tokens, output_tokens) {
            (Some(total), _, _) => Some(total),
            (None, Some(input), Some(output)) => Some(input + output),
            _ => None,
        };

        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    pub fn from_counts(input_tokens: usize, output_tokens: usize) -> Self {
        Self::new(Some(input_tokens), Some(output_tokens), None)
    }

    /// Total tokens of the call, zero when nothing was reported.
    pub fn total(&self) -> usize {
        self.total_tokens
            .or_else(|| match (self.input_tokens, self.output_tokens) {
                (Some(input), Some(output)) => Some(input + output),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn generated(&self) -> usize {
        self.output_tokens.unwrap_or(0)
    }
}

/// Receives usage after every successful completion.
///
/// Implementations are shared across exchanges running on different
/// threads and must aggregate without external locking.
pub trait UsageSink: Send + Sync {
    fn collect(&self, model: &str, usage: &Usage);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_derived_from_parts() {
        let usage = Usage::new(Some(100), Some(20), None);
        assert_eq!(usage.total_tokens, Some(120));
        assert_eq!(usage.total(), 120);
        assert_eq!(usage.generated(), 20);
    }

    #[test]
    fn test_reported_total_wins() {
        let usage = Usage::new(Some(100), Some(20), Some(150));
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn test_missing_fields() {
        let usage = Usage::new(None, Some(20), None);
        assert_eq!(usage.total_tokens, None);
        assert_eq!(usage.total(), 0);
        assert_eq!(Usage::default().generated(), 0);
    }

    #[test]
    fn test_usage_deserializes_partial_payload() {
        let usage: Usage = serde_json::from_str(r#"{"input_tokens": 12}"#).unwrap();
        assert_eq!(usage.input_tokens, Some(12));
        assert_eq!(usage.output_tokens, None);
    }
}
