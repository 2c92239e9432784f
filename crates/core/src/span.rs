//! Spans and allocations: the vocabulary of context budgeting.
//!
//! A [`Span`] is a candidate piece of context with a token cost. The
//! allocator never mutates spans; it only picks a subset of them and reports
//! the pick as an [`Allocation`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ValidationError;

/// What kind of context a span carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanCategory {
    /// An exchange where something went wrong (confusion, a wrong answer)
    ErrorEpoch,
    /// A change in the user's tone
    ToneShift,
    /// One of the most recent conversation turns
    RecentTurn,
    /// Auxiliary background the answer depends on
    AuxDep,
    /// A fragment sourced from the memory store
    Memory,
}

impl SpanCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorEpoch => "error_epoch",
            Self::ToneShift => "tone_shift",
            Self::RecentTurn => "recent_turn",
            Self::AuxDep => "aux_dep",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for SpanCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate piece of context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub id: String,

    pub content: String,

    pub category: SpanCategory,

    /// Token cost of including this span
    pub cost: u64,

    /// Base relevance before category weighting
    #[serde(default = "default_relevance")]
    pub relevance: f64,

    /// Free-form metadata; `topic` drives the diversity constraint
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

fn default_relevance() -> f64 {
    1.0
}

impl Span {
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        category: SpanCategory,
        cost: u64,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            category,
            cost,
            relevance: default_relevance(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = relevance;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<Value>) -> Self {
        self.metadata.insert("topic".into(), topic.into());
        self
    }

    /// The topic used for diversity accounting.
    ///
    /// `metadata.topic` may be a string or a number; spans without a topic
    /// are grouped by their category.
    pub fn topic_key(&self) -> String {
        match self.metadata.get("topic") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => self.category.as_str().to_string(),
        }
    }

    /// Check the structural invariants the allocator relies on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidSpan {
            span_id: self.id.clone(),
            reason: reason.into(),
        };
        if self.id.trim().is_empty() {
            return Err(invalid("empty id"));
        }
        if self.cost == 0 {
            return Err(invalid("zero cost"));
        }
        if !self.relevance.is_finite() || self.relevance < 0.0 {
            return Err(invalid("relevance must be finite and non-negative"));
        }
        Ok(())
    }
}

/// Weights per span category, keyed by category name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryMixture(BTreeMap<String, f64>);

impl CategoryMixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, category: impl Into<String>, weight: f64) -> Self {
        self.0.insert(category.into(), weight);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }

    /// Reject negative or non-finite weights.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, weight) in &self.0 {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ValidationError::InvalidMixture(format!(
                    "weight for '{name}' must be finite and non-negative, got {weight}"
                )));
            }
        }
        Ok(())
    }

    /// Weight applied to a category.
    ///
    /// An empty mixture weighs everything 1.0; a category missing from a
    /// non-empty mixture gets the mixture's mean weight.
    pub fn weight_for(&self, category: SpanCategory) -> f64 {
        if self.0.is_empty() {
            return 1.0;
        }
        match self.0.get(category.as_str()) {
            Some(w) => *w,
            None => self.0.values().sum::<f64>() / self.0.len() as f64,
        }
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for CategoryMixture {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// The allocator's pick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Chosen spans in pick order
    pub chosen: Vec<Span>,
    pub budget_used: u64,
    pub budget_total: u64,
}

impl Allocation {
    pub fn empty(budget_total: u64) -> Self {
        Self {
            chosen: Vec::new(),
            budget_used: 0,
            budget_total,
        }
    }

    pub fn chosen_ids(&self) -> Vec<&str> {
        self.chosen.iter().map(|s| s.id.as_str()).collect()
    }

    /// Budget utilization percentage (0.0–100.0).
    pub fn utilization_pct(&self) -> f32 {
        if self.budget_total == 0 {
            return 0.0;
        }
        (self.budget_used as f64 / self.budget_total as f64 * 100.0) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_key_accepts_numbers_and_falls_back_to_category() {
        let numbered = Span::new("a", "x", SpanCategory::ErrorEpoch, 10).with_topic(3);
        let named = Span::new("b", "x", SpanCategory::ErrorEpoch, 10).with_topic("rust");
        let bare = Span::new("c", "x", SpanCategory::ToneShift, 10);
        assert_eq!(numbered.topic_key(), "3");
        assert_eq!(named.topic_key(), "rust");
        assert_eq!(bare.topic_key(), "tone_shift");
    }

    #[test]
    fn span_validation() {
        assert!(Span::new("ok", "x", SpanCategory::AuxDep, 1).validate().is_ok());
        assert!(Span::new("", "x", SpanCategory::AuxDep, 1).validate().is_err());
        assert!(Span::new("zero", "x", SpanCategory::AuxDep, 0).validate().is_err());
        assert!(
            Span::new("nan", "x", SpanCategory::AuxDep, 1)
                .with_relevance(f64::NAN)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn mixture_weights() {
        let mixture = CategoryMixture::new()
            .with("error_epoch", 0.6)
            .with("recent_turn", 0.2);
        assert_eq!(mixture.weight_for(SpanCategory::ErrorEpoch), 0.6);
        // Missing category gets the mean
        assert!((mixture.weight_for(SpanCategory::AuxDep) - 0.4).abs() < 1e-12);
        assert_eq!(CategoryMixture::new().weight_for(SpanCategory::Memory), 1.0);
    }

    #[test]
    fn negative_mixture_weight_rejected() {
        let mixture = CategoryMixture::new().with("logic", -0.1);
        assert!(matches!(
            mixture.validate(),
            Err(ValidationError::InvalidMixture(_))
        ));
    }

    #[test]
    fn span_category_serializes_snake_case() {
        let span = Span::new("s", "x", SpanCategory::ErrorEpoch, 5);
        let json = serde_json::to_string(&span).unwrap();
        assert!(json.contains("\"error_epoch\""));
        let back: Span = serde_json::from_str(&json).unwrap();
        assert_eq!(back.relevance, 1.0);
    }

    #[test]
    fn allocation_utilization() {
        let alloc = Allocation {
            chosen: vec![],
            budget_used: 50,
            budget_total: 200,
        };
        assert!((alloc.utilization_pct() - 25.0).abs() < 1e-6);
        assert_eq!(Allocation::empty(0).utilization_pct(), 0.0);
    }
}
