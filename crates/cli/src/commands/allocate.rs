//! `mnemo allocate`: Pick spans from a JSON file for a token budget.

use mnemo_agent::ContextAllocator;
use mnemo_config::AppConfig;
use mnemo_core::{CategoryMixture, Span};
use std::path::Path;
use tracing::warn;

pub async fn run(
    config: &AppConfig,
    file: &Path,
    budget: u64,
    mixture: Option<&str>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let content = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| format!("Failed to read {}: {e}", file.display()))?;
    let spans = parse_spans(&content)?;

    let allocator = ContextAllocator::from_config(&config.allocator);
    let mixture = match mixture {
        Some(raw) => parse_mixture(raw)?,
        None => allocator.default_mixture().clone(),
    };
    let allocation = allocator.allocate(&spans, budget, &mixture)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&allocation)?);
        return Ok(());
    }

    println!(
        "  Used {}/{} tokens ({:.1}%) across {} span(s)",
        allocation.budget_used,
        allocation.budget_total,
        allocation.utilization_pct(),
        allocation.chosen.len()
    );
    for span in &allocation.chosen {
        println!(
            "  {:<16} {:<12} {:>6}  topic={}",
            span.id,
            span.category.as_str(),
            span.cost,
            span.topic_key()
        );
    }
    Ok(())
}

/// Parse a JSON array of spans, skipping entries that do not deserialize.
///
/// Only a document that is not a JSON array is an error.
pub fn parse_spans(content: &str) -> Result<Vec<Span>, String> {
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| format!("Invalid JSON: {e}"))?;
    let items = value
        .as_array()
        .ok_or("Expected a JSON array of spans")?;

    let spans = items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value::<Span>(item.clone()) {
            Ok(span) => Some(span),
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed span");
                None
            }
        })
        .collect();
    Ok(spans)
}

/// Parse `name=weight` pairs separated by commas.
pub fn parse_mixture(raw: &str) -> Result<CategoryMixture, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, weight) = pair
                .split_once('=')
                .ok_or_else(|| format!("Expected name=weight, got '{pair}'"))?;
            let weight: f64 = weight
                .trim()
                .parse()
                .map_err(|_| format!("Invalid weight in '{pair}'"))?;
            Ok((name.trim().to_string(), weight))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::SpanCategory;

    #[test]
    fn parses_pairs() {
        let mixture = parse_mixture("error_epoch=0.5, recent_turn = 0.25,").unwrap();
        assert_eq!(mixture.weight_for(SpanCategory::ErrorEpoch), 0.5);
        assert_eq!(mixture.weight_for(SpanCategory::RecentTurn), 0.25);
    }

    #[test]
    fn malformed_spans_are_skipped() {
        let content = r#"[
            {"id": "err-1", "content": "wrong answer", "category": "error_epoch", "cost": 20},
            {"id": "sum-1", "content": "recap", "category": "summary", "cost": 10},
            {"id": "neg", "content": "x", "category": "aux_dep", "cost": -5},
            {"content": "no id", "category": "aux_dep", "cost": 5},
            {"id": "aux-1", "content": "billing docs", "category": "aux_dep", "cost": 30}
        ]"#;
        let spans = parse_spans(content).unwrap();
        let ids: Vec<&str> = spans.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["err-1", "aux-1"]);
    }

    #[test]
    fn span_file_must_be_an_array() {
        assert!(parse_spans(r#"{"id": "a"}"#).is_err());
        assert!(parse_spans("not json").is_err());
        assert!(parse_spans("[]").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_pairs() {
        assert!(parse_mixture("error_epoch").is_err());
        assert!(parse_mixture("error_epoch=lots").is_err());
        assert!(parse_mixture("").unwrap().is_empty());
    }
}
