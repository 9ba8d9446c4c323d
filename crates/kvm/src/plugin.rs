//! KVM resource plugin

use crate::config::{InventoryPolicy, KvmConfig};
use async_trait::async_trait;
use dpm::{Device, DeviceInventory, DpmError, ResourcePlugin};
use kubedev_proto::{AllocateRequest, AllocateResponse, DeviceSpec};
use std::sync::atomic::{AtomicU64, Ordering};
use tonic::Status;
use tracing::{debug, info};

/// Exposes the host KVM device to every container that asks for it.
///
/// The device is shared, so the ids in the inventory are only tokens for the
/// scheduler. Under [`InventoryPolicy::GrowOnAllocate`] each allocation adds
/// one more token (`kvm0`, `kvm1`, ...) so the resource never runs out.
pub struct KvmPlugin {
    name: String,
    inventory: DeviceInventory,
    spec: DeviceSpec,
    policy: InventoryPolicy,
    counter: AtomicU64,
}

impl KvmPlugin {
    pub fn new(name: impl Into<String>, device_ids: Vec<String>, config: &KvmConfig) -> Self {
        let name = name.into();
        info!(
            "Creating KVM plugin {} with initial devices {:?} ({})",
            name, device_ids, config.policy
        );

        Self {
            name,
            inventory: DeviceInventory::from_ids(device_ids),
            spec: DeviceSpec {
                container_path: config.container_path.to_string_lossy().into_owned(),
                host_path: config.device_path.to_string_lossy().into_owned(),
                permissions: config.permissions.clone(),
            },
            policy: config.policy,
            counter: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> InventoryPolicy {
        self.policy
    }

    /// Add the next synthetic device, skipping ids already taken.
    async fn grow(&self) -> Result<String, DpmError> {
        loop {
            let n = self.counter.fetch_add(1, Ordering::Relaxed);
            let id = format!("{}{}", self.name, n);
            match self.inventory.add(Device::healthy(id.clone())).await {
                Ok(()) => return Ok(id),
                Err(DpmError::DuplicateDevice(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ResourcePlugin for KvmPlugin {
    fn inventory(&self) -> &DeviceInventory {
        &self.inventory
    }

    async fn allocate(&self, request: AllocateRequest) -> Result<AllocateResponse, Status> {
        if request.devices_ids.is_empty() {
            return Err(Status::invalid_argument("no devices requested"));
        }

        for id in &request.devices_ids {
            if !self.inventory.contains(id).await {
                return Err(Status::not_found(format!(
                    "device {id} is not advertised by {}",
                    self.name
                )));
            }
        }

        if self.policy == InventoryPolicy::GrowOnAllocate {
            let added = self
                .grow()
                .await
                .map_err(|e| Status::internal(format!("failed to grow inventory: {e}")))?;
            debug!("{} inventory grew with {}", self.name, added);
        }

        Ok(AllocateResponse {
            devices: vec![self.spec.clone()],
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fixed_config() -> KvmConfig {
        KvmConfig {
            policy: InventoryPolicy::Fixed,
            ..Default::default()
        }
    }

    fn request(ids: &[&str]) -> AllocateRequest {
        AllocateRequest {
            devices_ids: ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    async fn ids(plugin: &KvmPlugin) -> Vec<String> {
        plugin
            .inventory()
            .snapshot()
            .await
            .into_iter()
            .map(|d| d.id)
            .collect()
    }

    #[tokio::test]
    async fn test_fixed_pool_allocation_contract() {
        let plugin = KvmPlugin::new("kvm", vec!["dev0".to_string()], &fixed_config());
        let mut updates = plugin.inventory().subscribe();

        let response = plugin.allocate(request(&["dev0"])).await.unwrap();

        assert_eq!(response.devices.len(), 1);
        assert_eq!(response.devices[0].host_path, "/dev/kvm");
        assert_eq!(response.devices[0].container_path, "/dev/kvm");
        assert_eq!(response.devices[0].permissions, "rw");
        assert!(response.mounts.is_empty());
        assert!(response.envs.is_empty());

        assert_eq!(ids(&plugin).await, vec!["dev0"]);
        let signalled = tokio::time::timeout(Duration::from_millis(50), updates.changed()).await;
        assert!(signalled.is_err());
    }

    #[tokio::test]
    async fn test_grow_on_allocate_adds_device_and_signals() {
        let plugin = KvmPlugin::new("kvm", vec!["kvm".to_string()], &KvmConfig::default());
        let mut updates = plugin.inventory().subscribe();

        plugin.allocate(request(&["kvm"])).await.unwrap();
        assert!(updates.changed().await);
        assert_eq!(ids(&plugin).await, vec!["kvm", "kvm0"]);

        plugin.allocate(request(&["kvm0"])).await.unwrap();
        assert_eq!(ids(&plugin).await, vec!["kvm", "kvm0", "kvm1"]);
    }

    #[tokio::test]
    async fn test_grow_skips_taken_ids() {
        let plugin = KvmPlugin::new(
            "kvm",
            vec!["kvm".to_string(), "kvm0".to_string()],
            &KvmConfig::default(),
        );

        plugin.allocate(request(&["kvm"])).await.unwrap();
        assert_eq!(ids(&plugin).await, vec!["kvm", "kvm0", "kvm1"]);
    }

    #[tokio::test]
    async fn test_unknown_device_is_not_found() {
        let plugin = KvmPlugin::new("kvm", vec!["kvm".to_string()], &KvmConfig::default());

        let err = plugin.allocate(request(&["gpu0"])).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
        // A rejected request must not grow the inventory.
        assert_eq!(ids(&plugin).await, vec!["kvm"]);
    }

    #[tokio::test]
    async fn test_empty_request_is_rejected() {
        let plugin = KvmPlugin::new("kvm", vec!["kvm".to_string()], &fixed_config());
        let err = plugin.allocate(request(&[])).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_configured_paths_flow_into_spec() {
        let config = KvmConfig {
            device_path: "/dev/kvm-host".into(),
            container_path: "/dev/kvm".into(),
            permissions: "rwm".to_string(),
            policy: InventoryPolicy::Fixed,
        };
        let plugin = KvmPlugin::new("kvm", vec!["kvm".to_string()], &config);

        let response = plugin.allocate(request(&["kvm"])).await.unwrap();
        assert_eq!(response.devices[0].host_path, "/dev/kvm-host");
        assert_eq!(response.devices[0].permissions, "rwm");
    }
}
