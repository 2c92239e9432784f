//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. Costs only
//! have to be consistent between spans, not exact for any tokenizer.

use mnemo_core::Span;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    (text.len() as u64).div_ceil(4)
}

/// Cost of a span built from `text`; never 0, since zero-cost spans are
/// rejected by the allocator.
pub fn span_cost(text: &str) -> u64 {
    estimate_tokens(text).max(1)
}

/// Total cost of a set of spans.
pub fn total_cost(spans: &[Span]) -> u64 {
    spans.iter().map(|s| s.cost).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::SpanCategory;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(span_cost(""), 1);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn hundred_chars() {
        let text = "a".repeat(100);
        assert_eq!(estimate_tokens(&text), 25);
    }

    #[test]
    fn total_cost_sums_spans() {
        let spans = vec![
            Span::new("a", "x", SpanCategory::RecentTurn, 10),
            Span::new("b", "y", SpanCategory::AuxDep, 32),
        ];
        assert_eq!(total_cost(&spans), 42);
        assert_eq!(total_cost(&[]), 0);
    }
}
