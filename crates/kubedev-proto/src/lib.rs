//! Kubelet device plugin protocol definitions
//!
//! This crate contains the protocol buffer definitions for the `v1alpha`
//! device plugin API, together with the constants both sides agree on.
//!
//! # Usage
//!
//! ```ignore
//! use kubedev_proto::{RegisterRequest, RegistrationClient, VERSION};
//! use kubedev_proto::{DevicePlugin, DevicePluginServer, ListAndWatchResponse};
//! ```
//!
//! # Services
//!
//! - `Registration`: served by the kubelet, called by a plugin once its own
//!   server is ready.
//! - `DevicePlugin`: served by every plugin on its own unix socket, called by
//!   the kubelet (`ListAndWatch` stream and `Allocate`).

// tonic::Status is large by design (176 bytes)
#![allow(clippy::result_large_err)]

/// Device plugin API (`deviceplugin` package).
pub mod deviceplugin {
    tonic::include_proto!("deviceplugin");
}

/// API version sent in every `RegisterRequest`.
pub const VERSION: &str = "v1alpha";

/// Directory the kubelet watches for plugin sockets.
pub const DEVICE_PLUGIN_PATH: &str = "/var/lib/kubelet/device-plugins/";

/// The kubelet's registration socket.
pub const KUBELET_SOCKET: &str = "/var/lib/kubelet/device-plugins/kubelet.sock";

/// Health value of a usable device.
pub const HEALTHY: &str = "Healthy";

/// Health value of a device that must not be scheduled.
pub const UNHEALTHY: &str = "Unhealthy";

// ============================================================================
// Re-exports: Registration (plugin calls kubelet)
// ============================================================================

pub use deviceplugin::{
    Empty,
    RegisterRequest,
    // Client and server
    registration_client::RegistrationClient,
    registration_server::{Registration, RegistrationServer},
};

// ============================================================================
// Re-exports: DevicePlugin (kubelet calls plugin)
// ============================================================================

pub use deviceplugin::{
    AllocateRequest,
    AllocateResponse,
    Device,
    DeviceSpec,
    ListAndWatchResponse,
    Mount,
    // Client and server
    device_plugin_client::DevicePluginClient,
    device_plugin_server::{DevicePlugin, DevicePluginServer},
};
