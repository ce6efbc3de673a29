//! The security (ownership transfer) collaborator interface

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Duration;
use uuid::Uuid;

use crate::error::TransportError;

/// Ownership-transfer method selected on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferMethod {
    /// The device generates a random PIN; exchange is handled by the
    /// security layer itself
    RandomPin,
    /// A PIN preconfigured on the device must be installed before transfer
    PreconfiguredPin,
    /// Any other method; requires administrative intervention
    Unsupported,
}

/// A device admitted to multi-owner transfer, as resolved by
/// [`SecurityProvider::discover_mot_device`].
#[async_trait]
pub trait MotDevice: Send + Sync {
    /// Whether the calling application is already a recognized sub-owner
    async fn is_subowner(&self) -> Result<bool, TransportError>;

    /// The ownership-transfer method currently selected on the device
    fn selected_transfer_method(&self) -> TransferMethod;

    /// Install a preconfigured PIN ahead of the transfer
    async fn set_preconfigured_pin(&self, pin: &str) -> Result<(), TransportError>;

    /// Begin the multi-owner transfer. The outcome is reported on `done`;
    /// there is no cancellation primitive, so an abandoned transfer simply
    /// never has its result read.
    fn begin_transfer(&self, done: oneshot::Sender<Result<(), TransportError>>);
}

/// PIN solicitation hooks the registry installs so the security layer can
/// reach the application mid-handshake.
pub trait PinHooks: Send + Sync {
    /// Ask the application for a PIN. The first non-empty answer wins.
    fn pin_input(&self, device_id: &str, method: TransferMethod) -> Option<String>;

    /// Show a device-generated PIN to the application
    fn pin_display(&self, device_id: &str, method: TransferMethod, pin: &str);
}

/// The security-provisioning layer.
#[async_trait]
pub trait SecurityProvider: Send + Sync {
    /// Probe for a multi-owner-transfer capable device with the given
    /// identity, bounded by `timeout`. `Ok(None)` means the probe completed
    /// without finding the device.
    async fn discover_mot_device(
        &self,
        timeout: Duration,
        device: Uuid,
    ) -> Result<Option<Arc<dyn MotDevice>>, TransportError>;

    /// Install the PIN hooks used for provider-initiated solicitations
    fn register_pin_hooks(&self, hooks: Arc<dyn PinHooks>);

    /// Remove previously installed PIN hooks
    fn unregister_pin_hooks(&self);
}
