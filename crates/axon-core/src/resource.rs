//! Resource handles for discovered endpoints

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One addressable endpoint on a discovered device.
///
/// A handle is immutable once constructed; rediscovery of the same path
/// replaces the whole handle rather than patching it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    /// Resource path on the device (e.g. "/oic/d")
    pub uri: String,
    /// Host address the resource was discovered at
    pub host: String,
    /// Declared resource types
    pub resource_types: BTreeSet<String>,
    /// Declared resource interfaces
    pub resource_interfaces: BTreeSet<String>,
    /// Whether the resource supports observation
    pub observable: bool,
}

impl ResourceHandle {
    /// Check whether the resource declares the given type
    pub fn has_type(&self, resource_type: &str) -> bool {
        self.resource_types.contains(resource_type)
    }

    /// Check whether the resource declares the given interface
    pub fn has_interface(&self, interface: &str) -> bool {
        self.resource_interfaces.contains(interface)
    }
}
