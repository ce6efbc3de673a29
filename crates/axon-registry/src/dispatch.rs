//! Command dispatch: route application operations to device resources

use axon_core::{DeviceId, ResourceHandle, Status, Token};
use axon_transport::{ObserveHandle, QueryParams, Representation, Response, TransportError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::registry::DeviceRegistry;

/// An application-issued operation on a resource.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Read the resource's properties
    GetProperties,
    /// Update the resource's properties
    SetProperties(Representation),
    /// Create a child resource
    CreateResource(Representation),
    /// Delete the resource
    DeleteResource,
    /// Subscribe to resource change notifications
    StartObserve,
}

/// Addressing for a dispatch: the resource path, with an optional type used
/// both as a resolution fallback and as a request query, and an optional
/// request interface.
#[derive(Debug, Clone, Default)]
pub struct RequestTarget {
    pub path: String,
    pub resource_type: Option<String>,
    pub interface: Option<String>,
}

impl RequestTarget {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    fn query(&self) -> QueryParams {
        QueryParams {
            resource_type: self.resource_type.clone(),
            interface: self.interface.clone(),
        }
    }
}

/// A live observe subscription.
pub(crate) struct ObserveEntry {
    pub handle: ObserveHandle,
    pub pump: JoinHandle<()>,
}

fn flatten(result: Result<Response, TransportError>) -> (Status, Option<Representation>) {
    match result {
        Ok(response) => (Status::from(response.code), response.representation),
        Err(e) => {
            debug!(error = %e, "Request failed at the transport layer");
            (Status::Fail, None)
        }
    }
}

impl DeviceRegistry {
    /// Dispatch one operation against a device.
    ///
    /// The resource is resolved by path, falling back to the first resource
    /// implementing the requested type. Exactly one asynchronous transport
    /// call is issued; its completion is reported to the listeners with the
    /// returned token.
    pub async fn dispatch(
        &self,
        device: &DeviceId,
        target: RequestTarget,
        operation: Operation,
    ) -> Result<Token, RegistryError> {
        let resource = {
            let store = self.inner.store.read().await;
            let record = store
                .get(device)
                .ok_or_else(|| RegistryError::DeviceNotDiscovered(device.clone()))?;
            record
                .find_resource(&target.path, target.resource_type.as_deref())
                .cloned()
                .ok_or_else(|| RegistryError::ResourceNotFound {
                    device: device.clone(),
                    path: target.path.clone(),
                })?
        };

        let token = self.inner.allocate_token();
        let query = target.query();
        debug!(device = %device, uri = %resource.uri, token = %token, "Dispatching request");

        match operation {
            Operation::GetProperties => {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    let (status, rep) = flatten(inner.transport.get(&resource, query).await);
                    for listener in inner.listeners.snapshot() {
                        listener.on_get_complete(status, rep.as_ref(), token);
                    }
                });
            }
            Operation::SetProperties(body) | Operation::CreateResource(body) => {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    let (status, rep) = flatten(inner.transport.post(&resource, query, body).await);
                    for listener in inner.listeners.snapshot() {
                        listener.on_set_complete(status, rep.as_ref(), token);
                    }
                });
            }
            Operation::DeleteResource => {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    let (status, _) = flatten(inner.transport.delete(&resource).await);
                    for listener in inner.listeners.snapshot() {
                        listener.on_delete_complete(status, token);
                    }
                });
            }
            Operation::StartObserve => {
                self.start_observe(&resource, query, token).await?;
            }
        }

        Ok(token)
    }

    /// Register the subscription with the transport and pump its
    /// notifications to the listeners. The subscription handle is recorded
    /// under the token so the observe can be cancelled later.
    async fn start_observe(
        &self,
        resource: &ResourceHandle,
        query: QueryParams,
        token: Token,
    ) -> Result<(), RegistryError> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let handle = self
            .inner
            .transport
            .observe(resource, query, events_tx)
            .await?;

        let inner = self.inner.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let status = Status::from(event.code);
                for listener in inner.listeners.snapshot() {
                    listener.on_observe_update(status, &event.representation, event.sequence, token);
                }
            }
            debug!(token = %token, "Observe stream closed");
        });

        self.inner
            .observes
            .lock()
            .await
            .insert(token, ObserveEntry { handle, pump });
        Ok(())
    }

    /// Cancel an observe previously started with the given token.
    /// Cancelling an observe that was never started is a caller error.
    pub async fn stop_observe(&self, token: Token) -> Result<(), RegistryError> {
        let entry = self
            .inner
            .observes
            .lock()
            .await
            .remove(&token)
            .ok_or(RegistryError::ObserveNotActive(token))?;

        if let Err(e) = self.inner.transport.cancel_observe(entry.handle).await {
            warn!(token = %token, error = %e, "Observe cancellation failed at the transport");
        }
        entry.pump.abort();
        Ok(())
    }
}
