//! Device records for tracking discovered devices

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tokio::time::{Duration, Instant};

use crate::resource::ResourceHandle;

/// Stable identity of a discovered device, assigned at first discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Progress of one bounded metadata fetch.
///
/// `available` transitions false to true at most once; `attempts` counts
/// issued requests against the configured cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchState {
    pub available: bool,
    pub attempts: u8,
}

impl FetchState {
    /// Whether another request should be issued under the given attempt cap
    pub fn needs_request(&self, cap: u8) -> bool {
        !self.available && self.attempts < cap
    }

    /// Latch `available`. Returns false if it was already set, so racing
    /// completions resolve first-wins.
    pub fn mark_available(&mut self) -> bool {
        if self.available {
            return false;
        }
        self.available = true;
        true
    }
}

/// Per-device security-provisioning state. One attempt at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecurityState {
    /// A provisioning attempt is currently running for this device
    pub in_progress: bool,
    /// The caller is a recognized sub-owner of the device
    pub subowner: bool,
}

/// Descriptive metadata returned by the device-info resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device identity, known from discovery before the fetch completes
    pub device_id: String,
    /// Human-readable device name
    pub name: String,
    /// Software version reported by the device
    pub software_version: String,
    /// Data model versions supported by the device
    pub data_model_versions: Vec<String>,
    /// Protocol-independent identity
    pub protocol_independent_id: String,
    /// All host addresses the device has been observed at
    pub hosts: Vec<String>,
}

/// Platform metadata returned by the platform-info resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub platform_id: String,
    pub manufacturer_name: String,
    pub manufacturer_url: String,
    pub model_number: String,
    pub manufacturing_date: String,
    pub platform_version: String,
    pub os_version: String,
    pub hardware_version: String,
    pub firmware_version: String,
    pub support_url: String,
    pub reference_time: String,
}

/// Everything the registry tracks for one device identity.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// Stable device identity
    pub id: DeviceId,
    /// Discovered resources keyed by path; last write wins per path
    pub resources: HashMap<String, ResourceHandle>,
    /// Observed host addresses, append-only; the first entry is the default
    pub hosts: Vec<String>,
    /// Union of resource types across every resource ever seen
    pub discovered_types: BTreeSet<String>,
    /// Union of resource interfaces across every resource ever seen
    pub discovered_interfaces: BTreeSet<String>,
    /// Device metadata, populated by the device-info fetch
    pub device_info: DeviceInfo,
    pub device_info_fetch: FetchState,
    /// Platform metadata, populated by the platform-info fetch
    pub platform_info: PlatformInfo,
    pub platform_info_fetch: FetchState,
    /// Maintenance-resource discovery state
    pub maintenance_fetch: FetchState,
    /// Number of application handles currently open on the device
    pub open_count: u32,
    /// Wall-clock time of first discovery
    pub first_discovered: DateTime<Utc>,
    /// When the open count last dropped to zero
    pub last_close: Instant,
    /// When the device last responded to discovery
    pub last_discovery_response: Instant,
    /// When the device was last pinged, if ever
    pub last_ping: Option<Instant>,
    /// Latched once discovery has gone silent past the threshold
    pub not_responding: bool,
    /// Security-provisioning state
    pub security: SecurityState,
}

impl DeviceRecord {
    /// Create a record for a newly discovered device. The device is not
    /// opened at this time, so `last_close` starts at `now`.
    pub fn new(id: DeviceId, now: Instant) -> Self {
        let device_info = DeviceInfo {
            device_id: id.0.clone(),
            ..DeviceInfo::default()
        };
        Self {
            id,
            resources: HashMap::new(),
            hosts: Vec::new(),
            discovered_types: BTreeSet::new(),
            discovered_interfaces: BTreeSet::new(),
            device_info,
            device_info_fetch: FetchState::default(),
            platform_info: PlatformInfo::default(),
            platform_info_fetch: FetchState::default(),
            maintenance_fetch: FetchState::default(),
            open_count: 0,
            first_discovered: Utc::now(),
            last_close: now,
            last_discovery_response: now,
            last_ping: None,
            not_responding: false,
            security: SecurityState::default(),
        }
    }

    /// Append a host address if it is new. Returns true when the list grew.
    pub fn add_host(&mut self, host: &str) -> bool {
        if self.hosts.iter().any(|h| h == host) {
            return false;
        }
        self.hosts.push(host.to_string());
        self.device_info.hosts = self.hosts.clone();
        true
    }

    /// The host used for requests that are not tied to a specific resource.
    pub fn default_host(&self) -> Option<&str> {
        self.hosts.first().map(|h| h.as_str())
    }

    /// Unused: no open handles and idle since the last close beyond the
    /// threshold. Eligible for eviction.
    pub fn is_unused(&self, now: Instant, threshold: Duration) -> bool {
        self.open_count == 0 && now.duration_since(self.last_close) > threshold
    }

    /// Silent: previously responding but no discovery response within the
    /// threshold.
    pub fn is_silent(&self, now: Instant, threshold: Duration) -> bool {
        !self.not_responding && now.duration_since(self.last_discovery_response) > threshold
    }

    /// Whether any of the common-resource fetches has not completed yet
    pub fn metadata_incomplete(&self) -> bool {
        !self.device_info_fetch.available
            || !self.platform_info_fetch.available
            || !self.maintenance_fetch.available
    }

    /// Resolve a resource by path, falling back to the first resource that
    /// implements the requested type.
    pub fn find_resource(&self, path: &str, resource_type: Option<&str>) -> Option<&ResourceHandle> {
        if let Some(resource) = self.resources.get(path) {
            return Some(resource);
        }
        let rt = resource_type?;
        self.resources.values().find(|r| r.has_type(rt))
    }
}
