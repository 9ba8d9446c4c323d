//! KVM device discovery

use crate::config::{KVM_NAME, KvmConfig};
use crate::error::Result;
use crate::plugin::KvmPlugin;
use dpm::{DeviceLister, DeviceMap};
use tracing::{debug, info};

/// Finds the KVM device node and builds [`KvmPlugin`]s.
#[derive(Debug, Clone, Default)]
pub struct KvmLister {
    config: KvmConfig,
}

impl KvmLister {
    pub fn new(config: KvmConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &KvmConfig {
        &self.config
    }
}

impl DeviceLister for KvmLister {
    type Plugin = KvmPlugin;

    fn discover(&self) -> DeviceMap {
        let mut devices = DeviceMap::new();

        if self.config.device_path.exists() {
            info!("Discovered {:?}", self.config.device_path);
            devices.insert(KVM_NAME.to_string(), vec![KVM_NAME.to_string()]);
        } else {
            debug!("{:?} not present", self.config.device_path);
        }

        devices
    }

    fn new_plugin(&self, name: &str, device_ids: Vec<String>) -> KvmPlugin {
        KvmPlugin::new(name, device_ids, &self.config)
    }
}
