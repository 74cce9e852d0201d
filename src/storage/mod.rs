//! # Cluster State Access
//!
//! The control plane never talks to the Kubernetes API directly. It reads a
//! point-in-time [`ObjectIndex`] through [`ClusterState`] and writes status
//! subresources through [`StatusWriter`]; an informer-backed client and the
//! file-backed [`ManifestStore`] are interchangeable behind these traits.

pub mod index;
pub mod manifest;

pub use index::ObjectIndex;
pub use manifest::ManifestStore;

use crate::domain::{GatewayStatus, HttpRouteStatus, NamespacedName};
use crate::errors::Result;
use async_trait::async_trait;

/// Read access to synchronized cluster state
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// A consistent snapshot of every object translation reads
    async fn snapshot(&self) -> Result<ObjectIndex>;
}

/// Write access limited to the `status` subresource
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn write_gateway_status(&self, name: &NamespacedName, status: GatewayStatus)
        -> Result<()>;

    async fn write_route_status(&self, name: &NamespacedName, status: HttpRouteStatus)
        -> Result<()>;
}
