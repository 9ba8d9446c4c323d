//! Configuration for the KVM device plugin

use crate::error::{KvmError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::Display;

/// Device node shared with containers.
pub const KVM_PATH: &str = "/dev/kvm";

/// Resource type name, also the id of the discovered device.
pub const KVM_NAME: &str = "kvm";

/// How `Allocate` treats the advertised inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InventoryPolicy {
    /// Advertise exactly the discovered devices; allocation never changes them.
    Fixed,
    /// Add one synthetic device per allocation so a shared device never
    /// looks exhausted to the scheduler.
    #[default]
    GrowOnAllocate,
}

/// KVM 插件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvmConfig {
    /// 主机上的设备路径
    #[serde(default = "default_device_path")]
    pub device_path: PathBuf,

    /// 容器内的设备路径
    #[serde(default = "default_device_path")]
    pub container_path: PathBuf,

    /// cgroup 设备权限（r / w / m 的组合）
    #[serde(default = "default_permissions")]
    pub permissions: String,

    /// 库存策略
    #[serde(default)]
    pub policy: InventoryPolicy,
}

fn default_device_path() -> PathBuf {
    PathBuf::from(KVM_PATH)
}

fn default_permissions() -> String {
    "rw".to_string()
}

impl Default for KvmConfig {
    fn default() -> Self {
        Self {
            device_path: default_device_path(),
            container_path: default_device_path(),
            permissions: default_permissions(),
            policy: InventoryPolicy::default(),
        }
    }
}

impl KvmConfig {
    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if !self.device_path.is_absolute() {
            return Err(KvmError::Config(format!(
                "device_path must be absolute: {:?}",
                self.device_path
            )));
        }

        if !self.container_path.is_absolute() {
            return Err(KvmError::Config(format!(
                "container_path must be absolute: {:?}",
                self.container_path
            )));
        }

        if self.permissions.is_empty() || !self.permissions.chars().all(|c| "rwm".contains(c)) {
            return Err(KvmError::Config(format!(
                "permissions must combine r, w and m: {:?}",
                self.permissions
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KvmConfig::default();
        assert_eq!(config.device_path, PathBuf::from("/dev/kvm"));
        assert_eq!(config.container_path, PathBuf::from("/dev/kvm"));
        assert_eq!(config.permissions, "rw");
        assert_eq!(config.policy, InventoryPolicy::GrowOnAllocate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(InventoryPolicy::GrowOnAllocate.to_string(), "grow_on_allocate");
        assert_eq!(InventoryPolicy::Fixed.to_string(), "fixed");

        // Log output and config files spell policies the same way.
        let config: KvmConfig = toml::from_str(&format!(
            "policy = \"{}\"",
            InventoryPolicy::GrowOnAllocate
        ))
        .unwrap();
        assert_eq!(config.policy, InventoryPolicy::GrowOnAllocate);
    }

    #[test]
    fn test_config_deserialize() {
        let config: KvmConfig = toml::from_str(
            r#"
            device_path = "/dev/kvm"
            permissions = "rwm"
            policy = "fixed"
            "#,
        )
        .unwrap();
        assert_eq!(config.policy, InventoryPolicy::Fixed);
        assert_eq!(config.permissions, "rwm");
        assert_eq!(config.container_path, PathBuf::from("/dev/kvm"));
    }

    #[test]
    fn test_validate_rejects_bad_permissions() {
        let config = KvmConfig {
            permissions: "rx".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = KvmConfig {
            permissions: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_relative_paths() {
        let config = KvmConfig {
            container_path: PathBuf::from("dev/kvm"),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
