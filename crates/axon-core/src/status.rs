//! Status taxonomy and request correlation tokens

use serde::{Deserialize, Serialize};

/// Status reported to application callers, synchronously or through a
/// completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// Operation succeeded
    Ok,
    /// A create-child operation produced a new resource
    ResourceCreated,
    /// A delete operation removed the resource
    ResourceDeleted,
    /// The device rejected the request
    AccessDenied,
    /// The device id has not been seen in any discovery event
    DeviceNotDiscovered,
    /// No resource matched the requested path or type
    ResourceNotFound,
    /// Metadata was requested before the device responded with it
    InformationNotAvailable,
    /// Allocation failed while copying out data
    OutOfMemory,
    /// Malformed caller input
    InvalidArgument,
    /// A security-provisioning attempt ended in failure
    SecurityUpdateFailed,
    /// The device's selected ownership-transfer method is not supported
    SecurityUpdateNotSupported,
    /// A security-provisioning attempt completed successfully
    SecurityUpdateFinished,
    /// Generic failure
    Fail,
}

impl Status {
    /// Whether the status represents a successful outcome
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            Status::Ok
                | Status::ResourceCreated
                | Status::ResourceDeleted
                | Status::SecurityUpdateFinished
        )
    }
}

/// Correlates an application request with its completion callback.
///
/// Tokens are allocated monotonically by the dispatcher and echoed back in
/// every completion for the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token(pub u64);

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
