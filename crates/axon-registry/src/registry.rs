//! The device registry service object

use axon_core::{DeviceId, DeviceInfo, DeviceRecord, PlatformInfo, Token};
use axon_transport::{DiscoveredResource, DiscoveryFilter, SecurityProvider, Transport};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{RegistryConfig, DEVICE_RESOURCE_TYPE};
use crate::dispatch::ObserveEntry;
use crate::error::RegistryError;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::listener::{DeviceListener, ListenerSet};
use crate::reconcile;
use crate::security::RegistryPinHooks;
use crate::store::DeviceStore;
use crate::sweep;

/// Shared state behind the registry service. Background tasks hold an `Arc`
/// to this and outlive the public handle if needed.
pub(crate) struct RegistryInner {
    pub(crate) config: RegistryConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) security: Arc<dyn SecurityProvider>,
    /// The single mutual-exclusion domain for all registry state
    pub(crate) store: RwLock<DeviceStore>,
    pub(crate) listeners: ListenerSet,
    pub(crate) lifecycle: Lifecycle,
    /// Sink handed to the transport with every discovery request; renewed
    /// on each start so stale deliveries land on a closed channel
    pub(crate) found_tx: Mutex<mpsc::UnboundedSender<DiscoveredResource>>,
    /// Active observe subscriptions by request token
    pub(crate) observes: Mutex<HashMap<Token, ObserveEntry>>,
    /// In-flight security-provisioning attempts, drained on stop
    pub(crate) access_tasks: Mutex<HashMap<DeviceId, JoinHandle<()>>>,
    /// Sweeper and event pump handles
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
    next_token: AtomicU64,
    pub(crate) sweep_wake: Notify,
}

impl RegistryInner {
    pub(crate) fn allocate_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) async fn found_sink(&self) -> mpsc::UnboundedSender<DiscoveredResource> {
        self.found_tx.lock().await.clone()
    }
}

/// The discovered-device registry.
///
/// Tracks every device seen by discovery, keeps metadata fresh in the
/// background, dispatches application commands to resources, and drives the
/// per-device security-provisioning workflow. Cheap to clone; all clones
/// share one registry.
#[derive(Clone)]
pub struct DeviceRegistry {
    pub(crate) inner: Arc<RegistryInner>,
}

impl DeviceRegistry {
    /// Create a registry over the given collaborators. The registry is
    /// inert until [`start`](Self::start) is called.
    pub fn new(
        config: RegistryConfig,
        transport: Arc<dyn Transport>,
        security: Arc<dyn SecurityProvider>,
    ) -> Self {
        // Replaced with a live channel on start; sends until then go nowhere.
        let (found_tx, _) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(RegistryInner {
                config,
                transport,
                security,
                store: RwLock::new(DeviceStore::new()),
                listeners: ListenerSet::new(),
                lifecycle: Lifecycle::new(),
                found_tx: Mutex::new(found_tx),
                observes: Mutex::new(HashMap::new()),
                access_tasks: Mutex::new(HashMap::new()),
                tasks: Mutex::new(Vec::new()),
                next_token: AtomicU64::new(1),
                sweep_wake: Notify::new(),
            }),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.state()
    }

    /// Start the background engines (event pump, staleness sweeper) and
    /// install the PIN hooks with the security layer. Idempotent.
    pub async fn start(&self) -> Result<(), RegistryError> {
        if !self
            .inner
            .lifecycle
            .transition(LifecycleState::Stopped, LifecycleState::Starting)
        {
            return Ok(());
        }

        self.inner.lifecycle.renew_cancel();

        let (found_tx, found_rx) = mpsc::unbounded_channel();
        *self.inner.found_tx.lock().await = found_tx;

        self.inner
            .security
            .register_pin_hooks(Arc::new(RegistryPinHooks::new(&self.inner)));

        let pump = tokio::spawn(reconcile::run_event_pump(self.inner.clone(), found_rx));
        let sweeper = tokio::spawn(sweep::run_sweeper(self.inner.clone()));
        self.inner.tasks.lock().await.extend([pump, sweeper]);

        self.inner
            .lifecycle
            .transition(LifecycleState::Starting, LifecycleState::Running);
        info!("Device registry started");
        Ok(())
    }

    /// Ordered teardown: stop the sweeper and event pump, drain in-flight
    /// security workflows, release the PIN hooks. Already-issued protocol
    /// requests are not cancelled; their late results are discarded.
    /// Idempotent.
    pub async fn stop(&self) -> Result<(), RegistryError> {
        if !self
            .inner
            .lifecycle
            .transition(LifecycleState::Running, LifecycleState::Stopping)
        {
            return Ok(());
        }

        self.inner.lifecycle.cancel();

        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        let attempts: Vec<(DeviceId, JoinHandle<()>)> =
            self.inner.access_tasks.lock().await.drain().collect();
        for (device, task) in attempts {
            debug!(device = %device, "Draining provisioning attempt");
            let _ = task.await;
        }

        self.inner.security.unregister_pin_hooks();
        self.inner
            .lifecycle
            .transition(LifecycleState::Stopping, LifecycleState::Stopped);
        info!("Device registry stopped");
        Ok(())
    }

    /// Register an application listener
    pub fn register_listener(&self, listener: Arc<dyn DeviceListener>) {
        self.inner.listeners.register(listener);
    }

    /// Remove a listener by pointer identity. An in-flight notification
    /// pass keeps its snapshot.
    pub fn unregister_listener(&self, listener: &Arc<dyn DeviceListener>) {
        self.inner.listeners.unregister(listener);
    }

    /// Trigger unscoped discovery for each filter. Matches arrive through
    /// the reconciler as the transport finds them.
    pub async fn discover(&self, filters: &[DiscoveryFilter]) -> Result<(), RegistryError> {
        for filter in filters {
            let sink = self.inner.found_sink().await;
            self.inner
                .transport
                .discover(None, filter.clone(), sink)
                .await?;
        }
        Ok(())
    }

    /// Record an application handle on a device
    pub async fn open_device(&self, id: &DeviceId) -> Result<(), RegistryError> {
        let mut store = self.inner.store.write().await;
        let record = store
            .get_mut(id)
            .ok_or_else(|| RegistryError::DeviceNotDiscovered(id.clone()))?;
        record.open_count += 1;
        Ok(())
    }

    /// Release an application handle; when the last one closes the idle
    /// clock starts for eviction.
    pub async fn close_device(&self, id: &DeviceId) -> Result<(), RegistryError> {
        let mut store = self.inner.store.write().await;
        let record = store
            .get_mut(id)
            .ok_or_else(|| RegistryError::DeviceNotDiscovered(id.clone()))?;
        if record.open_count == 0 {
            return Err(RegistryError::InvalidArgument(format!(
                "device {id} has no open handles"
            )));
        }
        record.open_count -= 1;
        if record.open_count == 0 {
            record.last_close = Instant::now();
        }
        Ok(())
    }

    /// Issue a device-type-filtered discovery against the device's default
    /// host and stamp the ping time.
    pub async fn ping_device(&self, id: &DeviceId) -> Result<(), RegistryError> {
        let host = {
            let store = self.inner.store.read().await;
            let record = store
                .get(id)
                .ok_or_else(|| RegistryError::DeviceNotDiscovered(id.clone()))?;
            record
                .default_host()
                .ok_or_else(|| RegistryError::DeviceNotDiscovered(id.clone()))?
                .to_string()
        };

        let sink = self.inner.found_sink().await;
        self.inner
            .transport
            .discover(
                Some(host),
                DiscoveryFilter::resource_type(DEVICE_RESOURCE_TYPE),
                sink,
            )
            .await?;

        let mut store = self.inner.store.write().await;
        if let Some(record) = store.get_mut(id) {
            record.last_ping = Some(Instant::now());
        }
        Ok(())
    }

    /// When the device was last pinged, if ever
    pub async fn last_ping_time(&self, id: &DeviceId) -> Result<Option<Instant>, RegistryError> {
        let store = self.inner.store.read().await;
        let record = store
            .get(id)
            .ok_or_else(|| RegistryError::DeviceNotDiscovered(id.clone()))?;
        Ok(record.last_ping)
    }

    /// Point-in-time copy of every device record
    pub async fn devices(&self) -> Vec<DeviceRecord> {
        self.inner.store.read().await.snapshot_all()
    }

    /// Point-in-time copy of one device record
    pub async fn device(&self, id: &DeviceId) -> Option<DeviceRecord> {
        self.inner.store.read().await.get(id).cloned()
    }

    /// Resolve a device by one of its observed host addresses
    pub async fn device_by_host(&self, host: &str) -> Option<DeviceRecord> {
        self.inner.store.read().await.lookup_by_host(host).cloned()
    }

    /// Device metadata, once the device-info fetch has completed
    pub async fn device_info(&self, id: &DeviceId) -> Result<DeviceInfo, RegistryError> {
        let store = self.inner.store.read().await;
        let record = store
            .get(id)
            .ok_or_else(|| RegistryError::DeviceNotDiscovered(id.clone()))?;
        if !record.device_info_fetch.available {
            return Err(RegistryError::InformationNotAvailable(id.clone()));
        }
        Ok(record.device_info.clone())
    }

    /// Platform metadata, once the platform-info fetch has completed
    pub async fn platform_info(&self, id: &DeviceId) -> Result<PlatformInfo, RegistryError> {
        let store = self.inner.store.read().await;
        let record = store
            .get(id)
            .ok_or_else(|| RegistryError::DeviceNotDiscovered(id.clone()))?;
        if !record.platform_info_fetch.available {
            return Err(RegistryError::InformationNotAvailable(id.clone()));
        }
        Ok(record.platform_info.clone())
    }

    /// Paths of the device's resources matching the optional type and
    /// interface filters
    pub async fn resource_paths(
        &self,
        id: &DeviceId,
        resource_type: Option<&str>,
        interface: Option<&str>,
    ) -> Result<Vec<String>, RegistryError> {
        let store = self.inner.store.read().await;
        let record = store
            .get(id)
            .ok_or_else(|| RegistryError::DeviceNotDiscovered(id.clone()))?;
        let mut paths: Vec<String> = record
            .resources
            .values()
            .filter(|r| resource_type.map_or(true, |rt| r.has_type(rt)))
            .filter(|r| interface.map_or(true, |i| r.has_interface(i)))
            .map(|r| r.uri.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Resource types of one resource, or the device-wide union when no
    /// path is given
    pub async fn resource_types(
        &self,
        id: &DeviceId,
        path: Option<&str>,
    ) -> Result<Vec<String>, RegistryError> {
        let store = self.inner.store.read().await;
        let record = store
            .get(id)
            .ok_or_else(|| RegistryError::DeviceNotDiscovered(id.clone()))?;
        match path {
            None => Ok(record.discovered_types.iter().cloned().collect()),
            Some(path) => record
                .resources
                .get(path)
                .map(|r| r.resource_types.iter().cloned().collect())
                .ok_or_else(|| RegistryError::ResourceNotFound {
                    device: id.clone(),
                    path: path.to_string(),
                }),
        }
    }

    /// Resource interfaces of one resource, or the device-wide union when
    /// no path is given
    pub async fn resource_interfaces(
        &self,
        id: &DeviceId,
        path: Option<&str>,
    ) -> Result<Vec<String>, RegistryError> {
        let store = self.inner.store.read().await;
        let record = store
            .get(id)
            .ok_or_else(|| RegistryError::DeviceNotDiscovered(id.clone()))?;
        match path {
            None => Ok(record.discovered_interfaces.iter().cloned().collect()),
            Some(path) => record
                .resources
                .get(path)
                .map(|r| r.resource_interfaces.iter().cloned().collect())
                .ok_or_else(|| RegistryError::ResourceNotFound {
                    device: id.clone(),
                    path: path.to_string(),
                }),
        }
    }

    /// Whether the resource at `path` supports observation. Unknown paths
    /// are simply not observable.
    pub async fn is_resource_observable(
        &self,
        id: &DeviceId,
        path: &str,
    ) -> Result<bool, RegistryError> {
        let store = self.inner.store.read().await;
        let record = store
            .get(id)
            .ok_or_else(|| RegistryError::DeviceNotDiscovered(id.clone()))?;
        Ok(record.resources.get(path).is_some_and(|r| r.observable))
    }

    /// Wake the staleness sweeper ahead of its next interval tick
    pub fn wake_sweeper(&self) {
        self.inner.sweep_wake.notify_one();
    }
}
