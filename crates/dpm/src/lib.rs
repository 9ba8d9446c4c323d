//! dpm - device plugin manager for the kubelet device plugin API
//!
//! This crate runs resource-specific device plugins: it owns their unix
//! sockets and gRPC servers, performs the registration handshake with the
//! kubelet and streams inventory snapshots over `ListAndWatch`.
//!
//! # Components
//!
//! - **PluginServer**: lifecycle engine of one plugin
//!   - Start / Stop state machine (`Stopped`, `Starting`, `Running`)
//!   - Readiness probe through the gRPC health service
//!   - Registration with the kubelet
//!
//! - **DeviceInventory**: devices advertised by one plugin
//!   - Consistent snapshots for streams
//!   - Change notification through a coalescing update channel
//!
//! - **Manager**: one `PluginServer` per resource type found by a
//!   `DeviceLister`, restarted when the kubelet re-creates its socket
//!
//! # Architecture
//!
//! ```text
//!     ┌─────────────────────┐                    ┌─────────────────────┐
//!     │    device plugin    │                    │       kubelet       │
//!     ├─────────────────────┤                    ├─────────────────────┤
//!     │                     │  Register          │                     │
//!     │  Registration       │ ─────────────────► │  Registration       │
//!     │  Client             │   kubelet.sock     │  Server             │
//!     │                     │                    │                     │
//!     │  DevicePlugin       │  ListAndWatch      │  DevicePlugin       │
//!     │  Server             │ ◄───────────────── │  Client             │
//!     │                     │  Allocate          │                     │
//!     └─────────────────────┘   <name>.sock      └─────────────────────┘
//! ```

// tonic::Status is large by design (176 bytes)
#![allow(clippy::result_large_err)]

pub mod config;
pub mod device;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod plugin;
pub mod registration;
pub mod service;
pub mod transport;
pub mod update;

// Re-export important types and functions
pub use config::DpmConfig;
pub use device::{Device, DeviceInventory, Health};
pub use error::{DpmError, RegistrationError, Result};
pub use lifecycle::{PluginServer, PluginState};
pub use manager::Manager;
pub use plugin::{DeviceLister, DeviceMap, ResourcePlugin};
pub use service::{DevicePluginService, SnapshotStream, snapshot_stream};
pub use transport::{PluginEndpoint, connect_unix};
pub use update::{UpdateChannel, UpdateReceiver};

// Re-export commonly used proto types from kubedev-proto
pub use kubedev_proto::{
    AllocateRequest, AllocateResponse, DeviceSpec, ListAndWatchResponse, Mount, VERSION,
};
