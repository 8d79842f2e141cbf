use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::{Engine, EngineError};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Rewrite the WAL as a snapshot once `threshold` appends have piled up.
/// Returns whether a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    engine.compact_wal().await?;
    debug!("compaction triggered after {appends} appends");
    Ok(true)
}

/// Background task that periodically compacts one tenant's WAL.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}
