//! `mnemo consolidate`: Merge similar stored fragments.

use mnemo_config::AppConfig;
use mnemo_memory::RunStatus;

pub async fn run(
    config: &AppConfig,
    threshold: Option<f32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (core, file) = super::open_core(config).await?;
    let before = core.store().len().await;

    let outcome = match threshold {
        Some(t) => core.consolidate_with_threshold(t, None).await,
        None => core.run_consolidation(None).await,
    };

    match &outcome.status {
        RunStatus::Completed => {
            core.save_snapshot(&file).await?;
            println!(
                "✅ {} run merged {} fragment(s) in {} round(s)",
                outcome.mode, outcome.merged_count, outcome.rounds
            );
            println!("   Store: {before} → {} fragment(s)", core.store().len().await);
            Ok(())
        }
        RunStatus::Failed { reason } => Err(format!("Consolidation failed: {reason}").into()),
    }
}
