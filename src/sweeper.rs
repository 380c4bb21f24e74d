use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::model::now_ms;
use crate::reservation::ReservationManager;
use crate::store::Store;

/// Periodically completes reservations whose end time has passed.
pub async fn run_sweeper(manager: Arc<ReservationManager>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match manager.complete_elapsed(now_ms()).await {
            Ok(0) => {}
            Ok(n) => info!("sweeper completed {n} reservations"),
            Err(e) => tracing::warn!("sweeper pass failed: {e}"),
        }
    }
}

/// Compacts the journal once enough appends have piled up.
pub async fn run_compactor(store: Arc<Store>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = store.journal_appends_since_compact().await;
        if appends < threshold {
            debug!("compactor skip: {appends} appends since last compaction");
            continue;
        }
        match store.compact_journal().await {
            Ok(()) => info!("journal compacted after {appends} appends"),
            Err(e) => tracing::error!("journal compaction failed: {e}"),
        }
    }
}
