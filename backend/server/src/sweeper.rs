//! Background task that purges expired login sessions.

use std::time::Duration;

use program_approval::ApprovalService;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Run the sweep loop until `shutdown` is cancelled.
pub async fn run(service: ApprovalService, interval: Duration, shutdown: CancellationToken) {
    info!("Session sweeper starting, interval {}s", interval.as_secs());

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Session sweeper stopped");
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = sweep_once(&service).await {
                    error!("Session sweep error: {e}");
                }
            }
        }
    }
}

/// Delete every expired session once. Returns how many were removed.
pub async fn sweep_once(service: &ApprovalService) -> program_approval::Result<u64> {
    let removed = service.prune_expired_sessions().await?;
    if removed > 0 {
        info!("Pruned {removed} expired session(s)");
    } else {
        debug!("No expired sessions");
    }
    Ok(removed)
}
