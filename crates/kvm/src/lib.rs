//! KVM device plugin
//!
//! Advertises the host's `/dev/kvm` as the `devices.kubevirt.io/kvm`
//! resource. Every container granted the resource gets the device node
//! mapped in read-write.
//!
//! ```ignore
//! use dpm::{DpmConfig, Manager};
//! use kvm::{KvmConfig, KvmLister};
//!
//! let lister = KvmLister::new(KvmConfig::default())?;
//! Manager::new(lister, DpmConfig::default()).run(shutdown).await?;
//! ```

// tonic::Status is large by design (176 bytes)
#![allow(clippy::result_large_err)]

pub mod config;
pub mod error;
pub mod lister;
pub mod plugin;

pub use config::{InventoryPolicy, KVM_NAME, KVM_PATH, KvmConfig};
pub use error::{KvmError, Result};
pub use lister::KvmLister;
pub use plugin::KvmPlugin;
