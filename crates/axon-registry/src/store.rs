//! The device store: primary map plus host index, one lock domain
//!
//! Every mutation and multi-field read of registry state goes through this
//! type under a single lock. No network call is ever made while it is held;
//! callers take snapshots and do slow work after release.

use axon_core::{DeviceId, DeviceInfo, DeviceRecord, ResourceHandle};
use axon_transport::{DiscoveredResource, Representation};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};
use tokio::time::Instant;

use crate::config::{DEVICE_INFO_URI, MAINTENANCE_RESOURCE_TYPE, PLATFORM_INFO_URI, RegistryConfig};

/// Result of merging one discovery event.
pub(crate) struct DiscoveryOutcome {
    /// The event created the record
    pub new_device: bool,
    /// The event carried new information (resource, host, type, interface)
    pub updated: bool,
    pub device_info: DeviceInfo,
    pub discovered_types: BTreeSet<String>,
}

/// Metadata requests to issue after the lock is released. Attempt counters
/// were already charged for every `Some` entry.
#[derive(Default)]
pub(crate) struct FetchPlan {
    pub device_info_host: Option<String>,
    pub platform_info_host: Option<String>,
    pub maintenance_host: Option<String>,
}

impl FetchPlan {
    pub fn is_empty(&self) -> bool {
        self.device_info_host.is_none()
            && self.platform_info_host.is_none()
            && self.maintenance_host.is_none()
    }
}

/// One pass of staleness classification. Evictions were already applied.
#[derive(Default)]
pub(crate) struct SweepReport {
    pub evicted: Vec<DeviceId>,
    /// Devices newly flagged not-responding, with the data their "lost"
    /// notification needs
    pub lost: Vec<(DeviceInfo, BTreeSet<String>)>,
    /// Devices with incomplete metadata to retry
    pub refetch: Vec<DeviceId>,
}

#[derive(Default)]
pub(crate) struct DeviceStore {
    records: HashMap<DeviceId, DeviceRecord>,
    /// Host address to owning device identity. An index, never an owner;
    /// eviction strips both maps in the same critical section.
    by_host: HashMap<String, DeviceId>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create-if-absent, idempotent. Returns the record for the id.
    pub fn upsert(&mut self, id: &DeviceId, now: Instant) -> &mut DeviceRecord {
        self.records
            .entry(id.clone())
            .or_insert_with(|| DeviceRecord::new(id.clone(), now))
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &DeviceId) -> Option<&mut DeviceRecord> {
        self.records.get_mut(id)
    }

    pub fn lookup_by_host(&self, host: &str) -> Option<&DeviceRecord> {
        let id = self.by_host.get(host)?;
        self.records.get(id)
    }

    /// Remove a record and every host index entry pointing at it
    pub fn remove(&mut self, id: &DeviceId) -> Option<DeviceRecord> {
        let record = self.records.remove(id)?;
        for host in &record.hosts {
            if self.by_host.get(host) == Some(id) {
                self.by_host.remove(host);
            }
        }
        Some(record)
    }

    /// Point-in-time copy of every record, ordered by device id
    pub fn snapshot_all(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Merge one discovery event: create the record if the id is new, clear
    /// the not-responding latch, replace the resource at its path, index the
    /// host, and union the declared types/interfaces.
    pub fn apply_discovery(&mut self, found: &DiscoveredResource, now: Instant) -> DiscoveryOutcome {
        let id = DeviceId::new(found.device_id.clone());
        let new_device = !self.records.contains_key(&id);
        let record = self.upsert(&id, now);

        if new_device {
            info!(device = %record.id, "Added device to registry");
        }

        // Device is responding to discovery.
        record.not_responding = false;
        record.last_discovery_response = now;

        let handle = ResourceHandle {
            uri: found.uri.clone(),
            host: found.host.clone(),
            resource_types: found.resource_types.clone(),
            resource_interfaces: found.resource_interfaces.clone(),
            observable: found.observable,
        };

        // Replace any previous resource at this path; only a previously
        // unseen path counts as new information.
        let mut updated = record.resources.insert(found.uri.clone(), handle).is_none();

        let new_host = record.add_host(&found.host);
        updated |= new_host;

        let types_before = record.discovered_types.len();
        record
            .discovered_types
            .extend(found.resource_types.iter().cloned());
        updated |= record.discovered_types.len() > types_before;

        let interfaces_before = record.discovered_interfaces.len();
        record
            .discovered_interfaces
            .extend(found.resource_interfaces.iter().cloned());
        updated |= record.discovered_interfaces.len() > interfaces_before;

        // A resource declaring the maintenance type satisfies the
        // maintenance-resource fetch.
        if found.resource_types.contains(MAINTENANCE_RESOURCE_TYPE) {
            record.maintenance_fetch.mark_available();
        }

        let outcome = DiscoveryOutcome {
            new_device,
            updated,
            device_info: record.device_info.clone(),
            discovered_types: record.discovered_types.clone(),
        };

        if new_host {
            self.by_host.insert(found.host.clone(), id);
        }

        outcome
    }

    /// Decide which metadata requests to issue for a device, charging the
    /// attempt counters for each. Requests go to the host of the well-known
    /// resource when discovery returned one, else the default host.
    pub fn plan_metadata_fetch(&mut self, id: &DeviceId, cap: u8) -> Option<FetchPlan> {
        let record = self.records.get_mut(id)?;
        let default_host = record.default_host()?.to_string();
        let mut plan = FetchPlan::default();

        if record.device_info_fetch.needs_request(cap) {
            record.device_info_fetch.attempts += 1;
            let host = record
                .resources
                .get(DEVICE_INFO_URI)
                .map(|r| r.host.clone())
                .unwrap_or_else(|| default_host.clone());
            plan.device_info_host = Some(host);
        }

        if record.platform_info_fetch.needs_request(cap) {
            record.platform_info_fetch.attempts += 1;
            let host = record
                .resources
                .get(PLATFORM_INFO_URI)
                .map(|r| r.host.clone())
                .unwrap_or_else(|| default_host.clone());
            plan.platform_info_host = Some(host);
        }

        if record.maintenance_fetch.needs_request(cap) {
            record.maintenance_fetch.attempts += 1;
            plan.maintenance_host = Some(default_host);
        }

        Some(plan)
    }

    /// Merge a device-info response delivered for a host. First successful
    /// response wins; later completions and completions for unknown hosts
    /// return `None`.
    pub fn apply_device_info(
        &mut self,
        host: &str,
        rep: &Representation,
    ) -> Option<(DeviceInfo, BTreeSet<String>)> {
        let id = self.by_host.get(host)?.clone();
        let record = self.records.get_mut(&id)?;
        if !record.device_info_fetch.mark_available() {
            debug!(device = %id, "Duplicate device info response ignored");
            return None;
        }

        record.device_info.name = rep.str("n");
        record.device_info.software_version = rep.str("icv");
        record.device_info.data_model_versions = rep.string_array("dmv");
        record.device_info.protocol_independent_id = rep.str("piid");

        Some((record.device_info.clone(), record.discovered_types.clone()))
    }

    /// Merge a platform-info response delivered for a host, first wins.
    pub fn apply_platform_info(
        &mut self,
        host: &str,
        rep: &Representation,
    ) -> Option<(DeviceInfo, BTreeSet<String>)> {
        let id = self.by_host.get(host)?.clone();
        let record = self.records.get_mut(&id)?;
        if !record.platform_info_fetch.mark_available() {
            debug!(device = %id, "Duplicate platform info response ignored");
            return None;
        }

        record.platform_info.platform_id = rep.str("pi");
        record.platform_info.manufacturer_name = rep.str("mnmn");
        record.platform_info.manufacturer_url = rep.str("mnml");
        record.platform_info.model_number = rep.str("mnmo");
        record.platform_info.manufacturing_date = rep.str("mndt");
        record.platform_info.platform_version = rep.str("mnpv");
        record.platform_info.os_version = rep.str("mnos");
        record.platform_info.hardware_version = rep.str("mnhw");
        record.platform_info.firmware_version = rep.str("mnfv");
        record.platform_info.support_url = rep.str("mnsl");
        record.platform_info.reference_time = rep.str("st");

        Some((record.device_info.clone(), record.discovered_types.clone()))
    }

    /// One staleness pass: evict unused records, latch the not-responding
    /// flag on silent ones, and collect devices with incomplete metadata.
    /// Everything happens in the caller's critical section.
    pub fn sweep(&mut self, now: Instant, config: &RegistryConfig) -> SweepReport {
        let mut report = SweepReport::default();

        for (id, record) in &mut self.records {
            if record.is_unused(now, config.unused_after()) {
                report.evicted.push(id.clone());
                continue; // record is about to be removed
            }

            if record.is_silent(now, config.unresponsive_after()) {
                record.not_responding = true;
                report
                    .lost
                    .push((record.device_info.clone(), record.discovered_types.clone()));
            }

            if record.metadata_incomplete() {
                report.refetch.push(id.clone());
            }
        }

        for id in &report.evicted {
            self.remove(id);
            info!(device = %id, "Evicted unused device from registry");
        }

        debug!(devices = self.len(), "Staleness sweep complete");
        report
    }
}
