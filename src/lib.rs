//! # kubedev
//!
//! Kubelet device plugins for host resources, starting with `/dev/kvm`

pub mod config;

// Re-export commonly used types
pub use config::{KubedevConfig, LogConfig, ObservabilityConfig};
