use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::store::JournalStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact once the journal has grown by `threshold` appends. Returns
/// whether a compaction ran.
pub async fn compact_if_due(store: &JournalStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!("compacted journal after {appends} appends");
            true
        }
        Err(e) => {
            warn!("journal compaction failed: {e}");
            false
        }
    }
}

/// Background task that keeps the journal from growing without bound.
pub async fn run_compactor(store: Arc<JournalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}
