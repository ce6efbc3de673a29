//! The discovery/transport collaborator interface

use async_trait::async_trait;
use axon_core::ResourceHandle;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::types::{
    DiscoveredResource, DiscoveryFilter, ObserveEvent, ObserveHandle, QueryParams, Representation,
    Response,
};

/// The discovery/transport protocol layer.
///
/// Every method issues one asynchronous exchange. Discovery and observe
/// deliver their matches on the channel passed with the request; the other
/// methods complete through their returned future.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Discover resources. `host` scopes the request to one endpoint; `None`
    /// multicasts. One [`DiscoveredResource`] is sent on `found` per match,
    /// possibly long after this call returns.
    async fn discover(
        &self,
        host: Option<String>,
        filter: DiscoveryFilter,
        found: mpsc::UnboundedSender<DiscoveredResource>,
    ) -> Result<(), TransportError>;

    /// Fetch the device-info representation from a host
    async fn fetch_device_info(&self, host: &str) -> Result<Representation, TransportError>;

    /// Fetch the platform-info representation from a host
    async fn fetch_platform_info(&self, host: &str) -> Result<Representation, TransportError>;

    /// Read the properties of a resource
    async fn get(
        &self,
        resource: &ResourceHandle,
        query: QueryParams,
    ) -> Result<Response, TransportError>;

    /// Update properties of, or create a child under, a resource
    async fn post(
        &self,
        resource: &ResourceHandle,
        query: QueryParams,
        body: Representation,
    ) -> Result<Response, TransportError>;

    /// Delete a resource
    async fn delete(&self, resource: &ResourceHandle) -> Result<Response, TransportError>;

    /// Start observing a resource. Notifications are sent on `events` until
    /// the subscription is cancelled.
    async fn observe(
        &self,
        resource: &ResourceHandle,
        query: QueryParams,
        events: mpsc::UnboundedSender<ObserveEvent>,
    ) -> Result<ObserveHandle, TransportError>;

    /// Cancel an observe subscription
    async fn cancel_observe(&self, handle: ObserveHandle) -> Result<(), TransportError>;
}
