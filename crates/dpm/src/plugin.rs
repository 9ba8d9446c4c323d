//! Contracts implemented by resource-specific code
//!
//! A resource type plugs into the manager through two traits:
//!
//! - [`DeviceLister`] finds what exists on the host and builds one plugin per
//!   resource type.
//! - [`ResourcePlugin`] owns the inventory of one resource type and decides
//!   what `Allocate` hands out.
//!
//! The lifecycle engine ([`crate::PluginServer`]) holds a plugin by `Arc` and
//! serves `ListAndWatch` from its inventory; plugins never deal with sockets,
//! servers or registration.

use crate::device::DeviceInventory;
use async_trait::async_trait;
use kubedev_proto::{AllocateRequest, AllocateResponse};
use std::collections::BTreeMap;
use tonic::Status;

/// Resource type name (e.g. `kvm`) to the ids of its devices.
pub type DeviceMap = BTreeMap<String, Vec<String>>;

/// Resource-specific half of a device plugin.
#[async_trait]
pub trait ResourcePlugin: Send + Sync + 'static {
    /// Devices streamed to the kubelet.
    ///
    /// Any mutation must go through the inventory's own methods (or be
    /// followed by [`DeviceInventory::signal`]) so open streams resend it.
    fn inventory(&self) -> &DeviceInventory;

    /// Answer an allocation request for one container.
    async fn allocate(&self, request: AllocateRequest) -> Result<AllocateResponse, Status>;
}

/// Discovers devices of one kind and builds their plugins.
pub trait DeviceLister: Send + Sync {
    type Plugin: ResourcePlugin;

    /// Resource types present on this host and their device ids.
    fn discover(&self) -> DeviceMap;

    /// Plugin for resource type `name`, initially advertising `device_ids`.
    fn new_plugin(&self, name: &str, device_ids: Vec<String>) -> Self::Plugin;
}
