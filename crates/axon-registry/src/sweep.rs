//! Background staleness sweeper

use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::registry::RegistryInner;

/// Periodic staleness pass over the registry.
///
/// The sleep is interruptible: cancellation or an explicit wake re-checks
/// the stop condition immediately instead of waiting out the interval.
pub(crate) async fn run_sweeper(inner: Arc<RegistryInner>) {
    let interval = inner.config.sweep_interval();
    let cancel = inner.lifecycle.cancel_token();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = inner.sweep_wake.notified() => {}
            _ = tokio::time::sleep(interval) => {}
        }
        if inner.lifecycle.is_stopping() {
            break;
        }
        inner.sweep_once().await;
    }

    debug!("Staleness sweeper stopped");
}

impl RegistryInner {
    /// One sweep: classify and evict under the store lock, then perform the
    /// metadata retries and lost notifications outside it.
    pub(crate) async fn sweep_once(self: &Arc<Self>) {
        let report = {
            let mut store = self.store.write().await;
            store.sweep(Instant::now(), &self.config)
        };

        for id in &report.refetch {
            self.fetch_common_resources(id).await;
        }

        for (info, types) in &report.lost {
            warn!(device = %info.device_id, "Device stopped responding to discovery");
            self.notify_discovery(false, false, info, types);
        }
    }
}
