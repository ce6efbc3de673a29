//! Security-provisioning workflow: multi-owner transfer, one attempt per
//! device

use axon_core::{DeviceId, Status, Token};
use axon_transport::{PinHooks, TransferMethod};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::RegistryError;
use crate::registry::{DeviceRegistry, RegistryInner};

impl DeviceRegistry {
    /// Begin a security-provisioning attempt for a device.
    ///
    /// Fails synchronously when the registry is shutting down, the device is
    /// unknown, or an attempt is already in progress for it. The admitted
    /// attempt runs on its own task; its terminal outcome is reported once
    /// through `on_request_access_complete` with the given token.
    pub async fn request_access(
        &self,
        device: &DeviceId,
        token: Token,
    ) -> Result<(), RegistryError> {
        if !self.inner.lifecycle.is_running() {
            return Err(RegistryError::NotRunning);
        }

        {
            let mut store = self.inner.store.write().await;
            let record = store
                .get_mut(device)
                .ok_or_else(|| RegistryError::DeviceNotDiscovered(device.clone()))?;
            if record.security.in_progress {
                return Err(RegistryError::AccessInProgress(device.clone()));
            }
            record.security.in_progress = true;
        }

        info!(device = %device, "Starting security provisioning attempt");
        let inner = self.inner.clone();
        let id = device.clone();
        let task = tokio::spawn(async move {
            run_request_access(inner, id, token).await;
        });
        self.inner.access_tasks.lock().await.insert(device.clone(), task);
        Ok(())
    }
}

/// Drive one provisioning attempt to its terminal status, then reset the
/// per-device gate and notify the listeners exactly once.
async fn run_request_access(inner: Arc<RegistryInner>, device: DeviceId, token: Token) {
    let status = perform_request_access(&inner, &device).await;

    {
        let mut store = inner.store.write().await;
        if let Some(record) = store.get_mut(&device) {
            record.security.in_progress = false;
            if status == Status::SecurityUpdateFinished {
                record.security.subowner = true;
            }
        }
    }

    if status == Status::SecurityUpdateFinished {
        info!(device = %device, "Security provisioning finished");
    } else {
        warn!(device = %device, status = ?status, "Security provisioning failed");
    }

    for listener in inner.listeners.snapshot() {
        listener.on_request_access_complete(status, token);
    }

    inner.access_tasks.lock().await.remove(&device);
}

async fn perform_request_access(inner: &Arc<RegistryInner>, device: &DeviceId) -> Status {
    if inner.lifecycle.is_stopping() {
        return Status::SecurityUpdateFailed;
    }

    let uuid = match Uuid::parse_str(device.as_str()) {
        Ok(uuid) => uuid,
        Err(e) => {
            warn!(device = %device, error = %e, "Device id is not a valid identity");
            return Status::SecurityUpdateFailed;
        }
    };

    // Probe for multi-owner-transfer capability, bounded by the discovery
    // timeout.
    let mot_device = match inner
        .security
        .discover_mot_device(inner.config.security_discovery_timeout(), uuid)
        .await
    {
        Ok(Some(device)) => device,
        Ok(None) => {
            warn!(device = %device, "Device not discovered for ownership transfer");
            return Status::DeviceNotDiscovered;
        }
        Err(e) => {
            warn!(device = %device, error = %e, "Ownership-transfer capability probe failed");
            return Status::SecurityUpdateFailed;
        }
    };

    // Nothing to do when the caller is already a recognized sub-owner.
    match mot_device.is_subowner().await {
        Ok(true) => return Status::SecurityUpdateFinished,
        Ok(false) => {}
        Err(e) => {
            warn!(device = %device, error = %e, "Sub-owner check failed");
            return Status::SecurityUpdateFailed;
        }
    }

    match mot_device.selected_transfer_method() {
        // The security layer handles the PIN exchange itself.
        TransferMethod::RandomPin => {}
        TransferMethod::PreconfiguredPin => {
            let pin = inner
                .solicit_pin(device, TransferMethod::PreconfiguredPin)
                .unwrap_or_default();
            if let Err(e) = mot_device.set_preconfigured_pin(&pin).await {
                warn!(device = %device, error = %e, "Failed to install preconfigured PIN");
                return Status::SecurityUpdateFailed;
            }
        }
        TransferMethod::Unsupported => {
            warn!(device = %device, "Selected ownership-transfer method is not supported");
            return Status::SecurityUpdateNotSupported;
        }
    }

    // Race the transfer completion against the timeout and shutdown. The
    // in-flight operation cannot be cancelled, only abandoned.
    let (done_tx, done_rx) = oneshot::channel();
    mot_device.begin_transfer(done_tx);

    let cancel = inner.lifecycle.cancel_token();
    tokio::select! {
        outcome = done_rx => match outcome {
            Ok(Ok(())) => Status::SecurityUpdateFinished,
            Ok(Err(e)) => {
                warn!(device = %device, error = %e, "Ownership transfer failed");
                Status::SecurityUpdateFailed
            }
            Err(_) => {
                warn!(device = %device, "Ownership transfer dropped its completion");
                Status::SecurityUpdateFailed
            }
        },
        _ = tokio::time::sleep(inner.config.transfer_timeout()) => {
            warn!(device = %device, "Ownership transfer timed out");
            Status::SecurityUpdateFailed
        }
        _ = cancel.cancelled() => Status::SecurityUpdateFailed,
    }
}

impl RegistryInner {
    /// Ask the listeners for a PIN; the first answer wins.
    pub(crate) fn solicit_pin(&self, device: &DeviceId, method: TransferMethod) -> Option<String> {
        self.listeners
            .snapshot()
            .iter()
            .find_map(|listener| listener.on_password_input(device, method))
    }
}

/// Bridges provider-initiated PIN solicitations to the listener registry.
/// Holds a weak reference so hooks left registered past shutdown cannot
/// keep the registry alive.
pub(crate) struct RegistryPinHooks {
    inner: Weak<RegistryInner>,
}

impl RegistryPinHooks {
    pub(crate) fn new(inner: &Arc<RegistryInner>) -> Self {
        Self {
            inner: Arc::downgrade(inner),
        }
    }
}

impl PinHooks for RegistryPinHooks {
    fn pin_input(&self, device_id: &str, method: TransferMethod) -> Option<String> {
        let inner = self.inner.upgrade()?;
        inner.solicit_pin(&DeviceId::new(device_id), method)
    }

    fn pin_display(&self, device_id: &str, method: TransferMethod, pin: &str) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let device = DeviceId::new(device_id);
        for listener in inner.listeners.snapshot() {
            listener.on_password_display(&device, method, pin);
        }
    }
}
