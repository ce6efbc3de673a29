//! Axon Core - Core types for the discovered-device registry
//!
//! This crate provides the foundational types for the Axon system:
//! - Device identity and per-device records with liveness counters
//! - Resource handles for discovered endpoints
//! - Metadata fetch state with bounded attempt tracking
//! - The status taxonomy reported to application callers

pub mod device;
pub mod resource;
pub mod status;

pub use device::{DeviceId, DeviceInfo, DeviceRecord, FetchState, PlatformInfo, SecurityState};
pub use resource::ResourceHandle;
pub use status::{Status, Token};
