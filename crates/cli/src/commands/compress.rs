//! `mnemo compress`: Compress a JSON array of fragments.

use clap::ValueEnum;
use mnemo_config::CompressionMode;
use mnemo_core::RawFragment;
use mnemo_memory::compress;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Semantic,
    Exact,
}

impl From<Mode> for CompressionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Semantic => CompressionMode::Semantic,
            Mode::Exact => CompressionMode::Exact,
        }
    }
}

pub async fn run(file: &Path, mode: Mode, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let content = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| format!("Failed to read {}: {e}", file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    let items = value
        .as_array()
        .ok_or("Expected a JSON array of fragments")?;
    let raws: Vec<RawFragment> = items.iter().map(RawFragment::from_json).collect();

    let result = compress(&raws, mode.into());

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!(
        "  {} in → {} out (ratio {:.2}, {} rejected)",
        result.input,
        result.compacted.len(),
        result.ratio,
        result.rejected
    );
    for fragment in &result.compacted {
        println!(
            "  {}  [{} source(s)]  {}",
            fragment.id,
            fragment.source_refs.len(),
            fragment.content
        );
    }
    Ok(())
}
