use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use dispatch_common::config::LeaseConfig;

use crate::store::StoreClient;

/// Run the reclaim loop until `shutdown` fires, sweeping expired leases on
/// a fixed cadence. A single iteration failing (e.g. a transient store
/// error) is logged and does not stop the loop — the next tick tries again.
pub async fn run(store: Arc<StoreClient>, lease: LeaseConfig, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(lease.reclaim_interval_secs);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = reclaim_once(&store, &lease).await {
                    tracing::warn!(error = %e, "reclaimer iteration failed");
                }
            }
            _ = shutdown.changed() => {
                tracing::info!("reclaimer shutting down");
                return;
            }
        }
    }
}

async fn reclaim_once(store: &StoreClient, lease: &LeaseConfig) -> Result<(), crate::store::StoreError> {
    let counts = store
        .reclaim_expired_leases(lease.lease_timeout_secs as i64, lease.max_retries)
        .await?;

    if counts.retried > 0 || counts.failed > 0 {
        tracing::info!(
            retried = counts.retried,
            failed = counts.failed,
            "reclaimer swept expired leases"
        );
    }

    metrics::counter!("dispatch_reclaims_total", "outcome" => "retried").increment(counts.retried);
    metrics::counter!("dispatch_reclaims_total", "outcome" => "failed").increment(counts.failed);

    Ok(())
}
