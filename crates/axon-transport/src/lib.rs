//! Axon Transport - Collaborator interfaces for the device registry
//!
//! The registry consumes two external collaborators through narrow traits:
//! - [`Transport`]: the discovery/transport protocol layer (resource
//!   discovery, GET/POST/DELETE/OBSERVE exchanges, metadata fetches)
//! - [`SecurityProvider`]: the ownership-transfer layer (multi-owner
//!   capability probing, PIN handling, the transfer handshake itself)
//!
//! Both are opaque asynchronous services; the registry never sees wire
//! formats, only the data types in this crate.

pub mod error;
pub mod security;
pub mod transport;
pub mod types;

pub use error::TransportError;
pub use security::{MotDevice, PinHooks, SecurityProvider, TransferMethod};
pub use transport::Transport;
pub use types::{
    DiscoveredResource, DiscoveryFilter, ObserveEvent, ObserveHandle, QueryParams, Representation,
    Response, ResultCode,
};
