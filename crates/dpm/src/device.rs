//! Device inventory shared between a resource plugin and its streams

use crate::error::{DpmError, Result};
use crate::update::{UpdateChannel, UpdateReceiver};
use kubedev_proto::ListAndWatchResponse;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use strum::{AsRefStr, Display, EnumString};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Device health as understood by the kubelet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum Health {
    Healthy,
    Unhealthy,
}

/// One allocatable unit of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub health: Health,
}

impl Device {
    pub fn healthy(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            health: Health::Healthy,
        }
    }
}

impl From<&Device> for kubedev_proto::Device {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id.clone(),
            health: device.health.to_string(),
        }
    }
}

/// Ordered set of advertised devices plus the channel that announces changes.
///
/// Clones share the same devices and the same update channel. Every mutating
/// method signals the channel after the write lock is released, so a woken
/// stream always reads a snapshot that includes the mutation.
#[derive(Debug, Clone, Default)]
pub struct DeviceInventory {
    devices: Arc<RwLock<Vec<Device>>>,
    updates: UpdateChannel,
}

impl DeviceInventory {
    /// Build an inventory. Later duplicates of an id are dropped.
    pub fn new(devices: impl IntoIterator<Item = Device>) -> Self {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for device in devices {
            if seen.insert(device.id.clone()) {
                unique.push(device);
            } else {
                warn!("Dropping duplicate device id {}", device.id);
            }
        }

        Self {
            devices: Arc::new(RwLock::new(unique)),
            updates: UpdateChannel::new(),
        }
    }

    /// Inventory of healthy devices with the given ids.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ids.into_iter().map(Device::healthy))
    }

    pub async fn snapshot(&self) -> Vec<Device> {
        self.devices.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.devices.read().await.iter().any(|d| d.id == id)
    }

    /// Append a device and notify subscribers.
    pub async fn add(&self, device: Device) -> Result<()> {
        {
            let mut devices = self.devices.write().await;
            if devices.iter().any(|d| d.id == device.id) {
                return Err(DpmError::DuplicateDevice(device.id));
            }
            debug!("Adding device {} ({})", device.id, device.health);
            devices.push(device);
        }
        self.updates.signal();
        Ok(())
    }

    /// Change the health of a device.
    ///
    /// Returns `false` if no device has this id. Subscribers are only
    /// notified when the health actually changes.
    pub async fn set_health(&self, id: &str, health: Health) -> bool {
        let changed = {
            let mut devices = self.devices.write().await;
            let Some(device) = devices.iter_mut().find(|d| d.id == id) else {
                return false;
            };
            let changed = device.health != health;
            device.health = health;
            changed
        };

        if changed {
            debug!("Device {} is now {}", id, health);
            self.updates.signal();
        }
        true
    }

    /// Notify subscribers without mutating, e.g. after an external change.
    pub fn signal(&self) {
        self.updates.signal();
    }

    pub fn subscribe(&self) -> UpdateReceiver {
        self.updates.subscribe()
    }

    /// Current snapshot in wire form.
    pub async fn to_response(&self) -> ListAndWatchResponse {
        let devices = self.devices.read().await;
        ListAndWatchResponse {
            devices: devices.iter().map(Into::into).collect(),
        }
    }
}
