//! Application listener registry with snapshot-then-iterate fan-out

use axon_core::{DeviceId, DeviceInfo, Status, Token};
use axon_transport::{Representation, TransferMethod};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

/// Application callback sink. All methods default to no-ops so listeners
/// implement only what they care about.
pub trait DeviceListener: Send + Sync {
    /// A device responded to discovery (`responding = true`) or was declared
    /// lost (`responding = false`). `updated` marks events that carried new
    /// information about the device.
    fn on_device_discovery(
        &self,
        responding: bool,
        updated: bool,
        device: &DeviceInfo,
        discovered_types: &BTreeSet<String>,
    ) {
        let _ = (responding, updated, device, discovered_types);
    }

    /// Completion of a fetch-properties request
    fn on_get_complete(&self, status: Status, representation: Option<&Representation>, token: Token) {
        let _ = (status, representation, token);
    }

    /// Completion of an update-properties or create-child request
    fn on_set_complete(&self, status: Status, representation: Option<&Representation>, token: Token) {
        let _ = (status, representation, token);
    }

    /// Completion of a delete request
    fn on_delete_complete(&self, status: Status, token: Token) {
        let _ = (status, token);
    }

    /// One notification from an observed resource
    fn on_observe_update(
        &self,
        status: Status,
        representation: &Representation,
        sequence: u32,
        token: Token,
    ) {
        let _ = (status, representation, sequence, token);
    }

    /// The security layer needs a PIN for the device. The first listener
    /// returning one wins.
    fn on_password_input(&self, device: &DeviceId, method: TransferMethod) -> Option<String> {
        let _ = (device, method);
        None
    }

    /// The security layer produced a PIN the application should show
    fn on_password_display(&self, device: &DeviceId, method: TransferMethod, password: &str) {
        let _ = (device, method, password);
    }

    /// Terminal outcome of a `request_access` attempt
    fn on_request_access_complete(&self, status: Status, token: Token) {
        let _ = (status, token);
    }
}

/// Ordered set of registered listeners.
///
/// Notification passes always iterate a snapshot, never the live list, so a
/// listener registering or deregistering during fan-out cannot affect an
/// in-flight pass or deadlock against it.
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn DeviceListener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn DeviceListener>) {
        let mut listeners = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.push(listener);
    }

    /// Remove a listener by pointer identity
    pub fn unregister(&self, listener: &Arc<dyn DeviceListener>) {
        let mut listeners = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Point-in-time copy of the registered listeners
    pub fn snapshot(&self) -> Vec<Arc<dyn DeviceListener>> {
        let listeners = match self.listeners.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.clone()
    }
}
