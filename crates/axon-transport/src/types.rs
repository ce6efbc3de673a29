//! Data types crossing the collaborator seams

use axon_core::Status;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Key/value property payload of a resource representation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Representation(pub Map<String, Value>);

impl Representation {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// String property, empty when absent or of another type
    pub fn str(&self, key: &str) -> String {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// String-array property, empty when absent
    pub fn string_array(&self, key: &str) -> Vec<String> {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }
}

/// Protocol-layer result of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultCode {
    Ok,
    Changed,
    Created,
    Deleted,
    Unauthorized,
    Error,
}

impl From<ResultCode> for Status {
    fn from(code: ResultCode) -> Self {
        match code {
            ResultCode::Ok | ResultCode::Changed => Status::Ok,
            ResultCode::Created => Status::ResourceCreated,
            ResultCode::Deleted => Status::ResourceDeleted,
            ResultCode::Unauthorized => Status::AccessDenied,
            ResultCode::Error => Status::Fail,
        }
    }
}

/// Completion of a GET/POST/DELETE exchange.
#[derive(Debug, Clone)]
pub struct Response {
    pub code: ResultCode,
    pub representation: Option<Representation>,
}

/// One inbound discovery event: a resource was found at a host/path.
///
/// Events may be duplicated or arbitrarily reordered relative to other
/// events for the same or different devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredResource {
    /// Stable identity of the device hosting the resource
    pub device_id: String,
    /// Resource path
    pub uri: String,
    /// Host address the resource responded from
    pub host: String,
    pub resource_types: BTreeSet<String>,
    pub resource_interfaces: BTreeSet<String>,
    pub observable: bool,
}

/// Resource-type filter for a discovery request (the `?rt=` query).
#[derive(Debug, Clone, Default)]
pub struct DiscoveryFilter {
    pub resource_type: Option<String>,
}

impl DiscoveryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn resource_type(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
        }
    }
}

/// Query parameters attached to a resource request.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pub resource_type: Option<String>,
    pub interface: Option<String>,
}

/// One notification from an observed resource.
#[derive(Debug, Clone)]
pub struct ObserveEvent {
    pub code: ResultCode,
    pub representation: Representation,
    pub sequence: u32,
}

/// Opaque subscription id used to cancel an observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserveHandle(pub u64);
