use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Background task that expires offers whose window has ended. The first
/// tick fires immediately, so a restart catches up on missed days.
pub async fn run_offer_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let today = engine.clock().today();
        match engine.expire_offers(today).await {
            Ok(expired) if expired.is_empty() => debug!("offer sweep for {today}: nothing due"),
            Ok(expired) => info!("offer sweep for {today}: expired {}", expired.len()),
            Err(e) => warn!("offer sweep for {today} failed: {e}"),
        }
    }
}

/// Background task that compacts the journal once enough records pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted journal after {appends} appends"),
            Err(e) => warn!("journal compaction failed: {e}"),
        }
    }
}
