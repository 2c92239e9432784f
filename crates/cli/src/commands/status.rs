//! `mnemo status`: Show pulse, store and breaker state.

use mnemo_config::AppConfig;

pub async fn run(config: &AppConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (core, file) = super::open_core(config).await?;
    let report = core.status().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("🧠 Mnemo Status");
    println!("===============");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Snapshot:     {}", file.path().display());
    println!("  Compression:  {}", config.memory.compression_mode.as_str());
    println!(
        "  Fragments:    {} ({} compacted)",
        report.store.fragments, report.store.compacted
    );
    println!(
        "  Pulse:        {:.3} bpm, hvv {:.2}, {} tick(s)",
        report.pulse.bpm, report.pulse.hvv, report.pulse.tick_counter
    );
    println!(
        "  Breaker:      {} ({}/{} failures)",
        report.breaker.status, report.breaker.failure_count, report.breaker.threshold
    );
    println!("  Consolidator: {:?}", report.phase);
    println!(
        "  Embedding:    {} ({} dims)",
        config.embedding.provider, config.embedding.dimensions
    );

    if file.path().exists() {
        println!("\n  ✅ Snapshot found");
    } else {
        println!("\n  ⚠️  No snapshot yet, run `mnemo ingest` first");
    }
    Ok(())
}
