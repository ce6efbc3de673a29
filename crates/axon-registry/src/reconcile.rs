//! Discovery reconciliation and common-resource metadata fetching

use axon_core::{DeviceId, DeviceInfo};
use axon_transport::{DiscoveredResource, DiscoveryFilter, Representation};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::MAINTENANCE_RESOURCE_TYPE;
use crate::registry::RegistryInner;

/// Consume inbound discovery events for the lifetime of a start cycle.
pub(crate) async fn run_event_pump(
    inner: Arc<RegistryInner>,
    mut found_rx: mpsc::UnboundedReceiver<DiscoveredResource>,
) {
    let cancel = inner.lifecycle.cancel_token();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            found = found_rx.recv() => match found {
                Some(found) => inner.on_resource_found(found).await,
                None => break,
            },
        }
    }
    debug!("Discovery event pump stopped");
}

impl RegistryInner {
    /// Merge one discovery event into the registry.
    ///
    /// Registry mutation happens atomically under the store lock; the
    /// follow-up discovery, metadata fetches, and listener fan-out all run
    /// after release so a re-entrant listener cannot deadlock.
    pub(crate) async fn on_resource_found(self: &Arc<Self>, found: DiscoveredResource) {
        debug!(
            device = %found.device_id,
            uri = %found.uri,
            host = %found.host,
            "Resource found"
        );

        let outcome = {
            let mut store = self.store.write().await;
            store.apply_discovery(&found, Instant::now())
        };

        if outcome.new_device {
            // Discover the rest of this device's resources, scoped to the
            // host that answered, and start the metadata fetches.
            self.spawn_discovery(Some(found.host.clone()), DiscoveryFilter::all());
            self.fetch_common_resources(&DeviceId::new(found.device_id.clone()))
                .await;
        }

        self.notify_discovery(true, outcome.updated, &outcome.device_info, &outcome.discovered_types);
    }

    /// Issue a discovery request without waiting for it.
    pub(crate) fn spawn_discovery(self: &Arc<Self>, host: Option<String>, filter: DiscoveryFilter) {
        let inner = self.clone();
        tokio::spawn(async move {
            let sink = inner.found_sink().await;
            if let Err(e) = inner.transport.discover(host.clone(), filter, sink).await {
                warn!(host = ?host, error = %e, "Discovery request failed");
            }
        });
    }

    /// Issue the bounded metadata fetches a device still needs: platform
    /// info, device info, and maintenance-resource discovery. Attempt
    /// counters are charged under the lock; the requests run afterwards on
    /// their own tasks.
    pub(crate) async fn fetch_common_resources(self: &Arc<Self>, id: &DeviceId) {
        let plan = {
            let mut store = self.store.write().await;
            store.plan_metadata_fetch(id, self.config.metadata_attempts)
        };
        let Some(plan) = plan else {
            return;
        };
        if plan.is_empty() {
            return;
        }

        if let Some(host) = plan.platform_info_host {
            let inner = self.clone();
            tokio::spawn(async move {
                match inner.transport.fetch_platform_info(&host).await {
                    Ok(rep) => inner.on_platform_info(&host, rep).await,
                    Err(e) => warn!(host = %host, error = %e, "Platform info fetch failed"),
                }
            });
        }

        if let Some(host) = plan.device_info_host {
            let inner = self.clone();
            tokio::spawn(async move {
                match inner.transport.fetch_device_info(&host).await {
                    Ok(rep) => inner.on_device_info(&host, rep).await,
                    Err(e) => warn!(host = %host, error = %e, "Device info fetch failed"),
                }
            });
        }

        if let Some(host) = plan.maintenance_host {
            self.spawn_discovery(
                Some(host),
                DiscoveryFilter::resource_type(MAINTENANCE_RESOURCE_TYPE),
            );
        }
    }

    /// Completion of a device-info fetch. First successful response wins;
    /// completions for evicted records are discarded.
    pub(crate) async fn on_device_info(&self, host: &str, rep: Representation) {
        let merged = {
            let mut store = self.store.write().await;
            store.apply_device_info(host, &rep)
        };
        match merged {
            Some((info, types)) => {
                info!(device = %info.device_id, "Device info available");
                self.notify_discovery(true, true, &info, &types);
            }
            None => debug!(host = %host, "Device info response discarded"),
        }
    }

    /// Completion of a platform-info fetch, same discipline as device info.
    pub(crate) async fn on_platform_info(&self, host: &str, rep: Representation) {
        let merged = {
            let mut store = self.store.write().await;
            store.apply_platform_info(host, &rep)
        };
        match merged {
            Some((info, types)) => {
                info!(device = %info.device_id, "Platform info available");
                self.notify_discovery(true, true, &info, &types);
            }
            None => debug!(host = %host, "Platform info response discarded"),
        }
    }

    /// Fan a discovery notification out to a snapshot of the listeners.
    pub(crate) fn notify_discovery(
        &self,
        responding: bool,
        updated: bool,
        device: &DeviceInfo,
        discovered_types: &BTreeSet<String>,
    ) {
        for listener in self.listeners.snapshot() {
            listener.on_device_discovery(responding, updated, device, discovered_types);
        }
    }
}
