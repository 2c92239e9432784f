pub mod allocate;
pub mod classify;
pub mod compress;
pub mod consolidate;
pub mod ingest;
pub mod init;
pub mod status;

use mnemo_agent::MemoryCore;
use mnemo_config::AppConfig;
use mnemo_memory::SnapshotFile;

/// The engine with the stored snapshot loaded, plus the snapshot file to
/// write back to.
pub(crate) async fn open_core(
    config: &AppConfig,
) -> Result<(MemoryCore, SnapshotFile), Box<dyn std::error::Error>> {
    let core = MemoryCore::new(config.clone());
    let file = SnapshotFile::new(config.snapshot_path());
    core.restore_snapshot(&file).await?;
    Ok((core, file))
}
