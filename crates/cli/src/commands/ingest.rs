//! `mnemo ingest`: Add fragments to the stored memory.

use mnemo_config::AppConfig;
use mnemo_core::RawFragment;
use std::io::BufRead;

pub async fn run(config: &AppConfig, content: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let lines = if content.len() == 1 && content[0] == "-" {
        std::io::stdin().lock().lines().collect::<Result<Vec<_>, _>>()?
    } else {
        content
    };

    let (core, file) = super::open_core(config).await?;
    let raws: Vec<RawFragment> = lines.into_iter().map(RawFragment::text).collect();
    let report = core.ingest_many(&raws).await;
    core.save_snapshot(&file).await?;

    println!(
        "✅ Ingested {} fragment(s), rejected {}",
        report.accepted.len(),
        report.rejected
    );
    println!("   Store now holds {} fragment(s)", core.store().len().await);
    Ok(())
}
