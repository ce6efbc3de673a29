//! Registry errors and their status mapping

use axon_core::{DeviceId, Status, Token};
use axon_transport::TransportError;
use thiserror::Error;

/// Failure of a registry operation, reported synchronously to the caller.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("device not discovered: {0}")]
    DeviceNotDiscovered(DeviceId),
    #[error("resource not found on device {device}: {path}")]
    ResourceNotFound { device: DeviceId, path: String },
    #[error("information not available for device {0}")]
    InformationNotAvailable(DeviceId),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("access request already in progress for device {0}")]
    AccessInProgress(DeviceId),
    #[error("no observe subscription for token {0}")]
    ObserveNotActive(Token),
    #[error("registry is not running")]
    NotRunning,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RegistryError {
    /// Map the error onto the caller-visible status taxonomy
    pub fn status(&self) -> Status {
        match self {
            RegistryError::DeviceNotDiscovered(_) => Status::DeviceNotDiscovered,
            RegistryError::ResourceNotFound { .. } => Status::ResourceNotFound,
            RegistryError::InformationNotAvailable(_) => Status::InformationNotAvailable,
            RegistryError::InvalidArgument(_) => Status::InvalidArgument,
            RegistryError::ObserveNotActive(_) => Status::InvalidArgument,
            RegistryError::AccessInProgress(_) | RegistryError::NotRunning => Status::Fail,
            RegistryError::Transport(_) => Status::Fail,
        }
    }
}
