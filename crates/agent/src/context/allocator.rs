//! Context budget allocation: a greedy knapsack with a diversity penalty.
//!
//! Each span is worth `relevance × mixture weight` and costs `span.cost`
//! tokens. Spans are picked by descending value density from a max-heap;
//! once a span is picked, every other span on the same topic is worth
//! `diversity_penalty` times less per pick already made on that topic.
//! Heap entries remember the topic count they were scored with and are
//! re-scored lazily when they surface stale. Values only ever shrink, so
//! the top of the heap after re-scoring is the true best pick.
//!
//! When two spans on different topics fit the budget together, the first
//! two picks are forced onto different topics, so the result always covers
//! at least two topics when that is possible at all.
//!
//! Ties break by span id ascending; identical input always yields the
//! identical allocation.

use mnemo_config::AllocatorConfig;
use mnemo_core::{Allocation, CategoryMixture, Span, ValidationError};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use tracing::{debug, warn};

const DEFAULT_PENALTY: f64 = 0.5;

/// Picks a budget-bounded subset of candidate spans.
#[derive(Debug, Clone)]
pub struct ContextAllocator {
    diversity_penalty: f64,
    default_mixture: CategoryMixture,
}

struct Candidate<'a> {
    span: &'a Span,
    topic: String,
    base_value: f64,
}

/// A heap entry scored against `seen` prior picks on its topic.
struct Entry<'a> {
    density: f64,
    id: &'a str,
    index: usize,
    seen: u32,
}

impl PartialEq for Entry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry<'_> {}

impl PartialOrd for Entry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher density first, then the smaller id
        self.density
            .total_cmp(&other.density)
            .then_with(|| other.id.cmp(self.id))
    }
}

/// Which spans the next pick may take.
enum Restriction<'a> {
    Any,
    /// Only spans that fit together with some span on another topic
    HasPartner,
    /// Only spans on a topic other than this one
    OtherTopic(&'a str),
}

impl ContextAllocator {
    /// `diversity_penalty` is clamped to `[0, 1]`; a non-finite value falls
    /// back to 0.5.
    pub fn new(diversity_penalty: f64) -> Self {
        let diversity_penalty = if diversity_penalty.is_finite() {
            diversity_penalty.clamp(0.0, 1.0)
        } else {
            DEFAULT_PENALTY
        };
        Self {
            diversity_penalty,
            default_mixture: CategoryMixture::new(),
        }
    }

    pub fn from_config(config: &AllocatorConfig) -> Self {
        let mut allocator = Self::new(config.diversity_penalty);
        allocator.default_mixture = config
            .default_mixture
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        allocator
    }

    pub fn diversity_penalty(&self) -> f64 {
        self.diversity_penalty
    }

    /// The mixture used when a caller has none of its own.
    pub fn default_mixture(&self) -> &CategoryMixture {
        &self.default_mixture
    }

    /// Choose spans for `budget` tokens.
    ///
    /// Invalid spans and repeated ids are dropped with a warning; an invalid
    /// mixture is an error.
    pub fn allocate(
        &self,
        spans: &[Span],
        budget: u64,
        mixture: &CategoryMixture,
    ) -> Result<Allocation, ValidationError> {
        mixture.validate()?;

        let candidates = collect_candidates(spans, budget, mixture);
        if candidates.is_empty() {
            debug!(budget, offered = spans.len(), "No span fits the budget");
            return Ok(Allocation::empty(budget));
        }

        let cheapest = cheapest_per_topic(&candidates);
        let has_partner = |c: &Candidate<'_>| {
            cheapest
                .iter()
                .filter(|(topic, _)| **topic != c.topic.as_str())
                .any(|(_, cost)| cost.saturating_add(c.span.cost) <= budget)
        };
        let floor = candidates.iter().any(|c| has_partner(c));

        let mut heap: BinaryHeap<Entry<'_>> = candidates
            .iter()
            .enumerate()
            .map(|(index, c)| Entry {
                density: c.base_value / c.span.cost as f64,
                id: c.span.id.as_str(),
                index,
                seen: 0,
            })
            .collect();

        let mut topic_counts: HashMap<&str, u32> = HashMap::new();
        let mut chosen: Vec<Span> = Vec::new();
        let mut remaining = budget;
        let mut first_topic: Option<&str> = None;

        loop {
            let restriction = match (floor, chosen.len(), first_topic) {
                (true, 0, _) => Restriction::HasPartner,
                (true, 1, Some(topic)) => Restriction::OtherTopic(topic),
                _ => Restriction::Any,
            };

            let mut deferred = Vec::new();
            let mut picked = None;
            while let Some(entry) = heap.pop() {
                let candidate = &candidates[entry.index];
                if candidate.span.cost > remaining {
                    // Remaining budget only shrinks
                    continue;
                }

                let seen = topic_counts
                    .get(candidate.topic.as_str())
                    .copied()
                    .unwrap_or(0);
                if entry.seen != seen {
                    let value = candidate.base_value * self.diversity_penalty.powi(seen as i32);
                    if value > 0.0 {
                        heap.push(Entry {
                            density: value / candidate.span.cost as f64,
                            seen,
                            ..entry
                        });
                    }
                    continue;
                }

                let allowed = match restriction {
                    Restriction::Any => true,
                    Restriction::HasPartner => has_partner(candidate),
                    Restriction::OtherTopic(topic) => candidate.topic != topic,
                };
                if allowed {
                    picked = Some(entry.index);
                    break;
                }
                deferred.push(entry);
            }
            heap.extend(deferred);

            let Some(index) = picked else { break };
            let candidate = &candidates[index];
            remaining -= candidate.span.cost;
            *topic_counts.entry(candidate.topic.as_str()).or_insert(0) += 1;
            first_topic.get_or_insert(candidate.topic.as_str());
            chosen.push(candidate.span.clone());
        }

        let allocation = Allocation {
            chosen,
            budget_used: budget - remaining,
            budget_total: budget,
        };
        debug!(
            budget,
            used = allocation.budget_used,
            spans = allocation.chosen.len(),
            topics = topic_counts.len(),
            "Context allocated"
        );
        Ok(allocation)
    }
}

impl Default for ContextAllocator {
    fn default() -> Self {
        Self::from_config(&AllocatorConfig::default())
    }
}

/// Valid, positive-value spans that fit the budget on their own.
fn collect_candidates<'a>(
    spans: &'a [Span],
    budget: u64,
    mixture: &CategoryMixture,
) -> Vec<Candidate<'a>> {
    let mut seen_ids = HashSet::new();
    let mut out = Vec::with_capacity(spans.len());

    for span in spans {
        if let Err(e) = span.validate() {
            warn!(error = %e, "Dropping invalid span");
            continue;
        }
        if !seen_ids.insert(span.id.as_str()) {
            warn!(span_id = %span.id, "Dropping span with duplicate id");
            continue;
        }
        if span.cost > budget {
            continue;
        }
        let base_value = span.relevance * mixture.weight_for(span.category);
        if base_value <= 0.0 {
            debug!(span_id = %span.id, "Skipping span with no value");
            continue;
        }
        out.push(Candidate {
            span,
            topic: span.topic_key(),
            base_value,
        });
    }
    out
}

fn cheapest_per_topic<'a>(candidates: &'a [Candidate<'_>]) -> BTreeMap<&'a str, u64> {
    let mut cheapest: BTreeMap<&str, u64> = BTreeMap::new();
    for c in candidates {
        cheapest
            .entry(c.topic.as_str())
            .and_modify(|cost| *cost = (*cost).min(c.span.cost))
            .or_insert(c.span.cost);
    }
    cheapest
}
