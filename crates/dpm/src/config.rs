//! Configuration for the device plugin manager

use crate::error::{DpmError, Result};
use kubedev_proto::{DEVICE_PLUGIN_PATH, KUBELET_SOCKET};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 设备插件管理器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DpmConfig {
    /// 插件 socket 所在目录（kubelet 监听的目录）
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: PathBuf,

    /// kubelet 注册服务 socket
    #[serde(default = "default_kubelet_socket")]
    pub kubelet_socket: PathBuf,

    /// 资源命名空间，资源名为 `<namespace>/<name>`
    #[serde(default = "default_resource_namespace")]
    pub resource_namespace: String,

    /// 连接 kubelet 的超时（秒）
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,

    /// 等待 gRPC 服务就绪的最大探测次数
    #[serde(default = "default_ready_poll_attempts")]
    pub ready_poll_attempts: u32,

    /// 就绪探测间隔（毫秒）
    #[serde(default = "default_ready_poll_interval")]
    pub ready_poll_interval_ms: u64,

    /// 停止服务时等待进行中调用结束的时间（秒）
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// 检查 kubelet socket 是否重建的间隔（秒）
    #[serde(default = "default_watch_interval")]
    pub watch_interval_secs: u64,
}

fn default_plugin_dir() -> PathBuf {
    PathBuf::from(DEVICE_PLUGIN_PATH)
}

fn default_kubelet_socket() -> PathBuf {
    PathBuf::from(KUBELET_SOCKET)
}

fn default_resource_namespace() -> String {
    "devices.kubevirt.io".to_string()
}

fn default_dial_timeout() -> u64 {
    5
}

fn default_ready_poll_attempts() -> u32 {
    10
}

fn default_ready_poll_interval() -> u64 {
    1000
}

fn default_stop_timeout() -> u64 {
    5
}

fn default_watch_interval() -> u64 {
    2
}

impl Default for DpmConfig {
    fn default() -> Self {
        Self {
            plugin_dir: default_plugin_dir(),
            kubelet_socket: default_kubelet_socket(),
            resource_namespace: default_resource_namespace(),
            dial_timeout_secs: default_dial_timeout(),
            ready_poll_attempts: default_ready_poll_attempts(),
            ready_poll_interval_ms: default_ready_poll_interval(),
            stop_timeout_secs: default_stop_timeout(),
            watch_interval_secs: default_watch_interval(),
        }
    }
}

impl DpmConfig {
    /// 使用指定目录构建配置，kubelet socket 位于同一目录下
    pub fn with_plugin_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            plugin_dir: dir.to_path_buf(),
            kubelet_socket: dir.join("kubelet.sock"),
            ..Default::default()
        }
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if self.plugin_dir.as_os_str().is_empty() {
            return Err(DpmError::Config("plugin_dir cannot be empty".to_string()));
        }

        if self.kubelet_socket.file_name().is_none() {
            return Err(DpmError::Config(format!(
                "kubelet_socket must name a socket file: {:?}",
                self.kubelet_socket
            )));
        }

        let namespace = self.resource_namespace.trim();
        if namespace.is_empty() || namespace.contains('/') {
            return Err(DpmError::Config(format!(
                "resource_namespace must be a non-empty domain without '/': {:?}",
                self.resource_namespace
            )));
        }

        if self.dial_timeout_secs == 0 {
            return Err(DpmError::Config(
                "dial_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.ready_poll_attempts == 0 {
            return Err(DpmError::Config(
                "ready_poll_attempts must be greater than 0".to_string(),
            ));
        }

        if self.watch_interval_secs == 0 {
            return Err(DpmError::Config(
                "watch_interval_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }

    /// Socket path for the plugin serving `name`.
    pub fn socket_for(&self, name: &str) -> PathBuf {
        self.plugin_dir.join(format!("{name}.sock"))
    }

    /// Fully qualified resource name for `name`.
    pub fn resource_name_for(&self, name: &str) -> String {
        format!("{}/{}", self.resource_namespace.trim(), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DpmConfig::default();
        assert_eq!(config.kubelet_socket, PathBuf::from(KUBELET_SOCKET));
        assert_eq!(config.ready_poll_attempts, 10);
        assert_eq!(config.ready_poll_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_plugin_dir_places_kubelet_socket_inside() {
        let config = DpmConfig::with_plugin_dir("/tmp/plugins");
        assert_eq!(config.kubelet_socket, PathBuf::from("/tmp/plugins/kubelet.sock"));
        assert_eq!(config.socket_for("kvm"), PathBuf::from("/tmp/plugins/kvm.sock"));
    }

    #[test]
    fn test_resource_name_for() {
        let config = DpmConfig::default();
        assert_eq!(config.resource_name_for("kvm"), "devices.kubevirt.io/kvm");
    }

    #[test]
    fn test_validate_rejects_namespace_with_slash() {
        let config = DpmConfig {
            resource_namespace: "devices.kubevirt.io/".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_poll_attempts() {
        let config = DpmConfig {
            ready_poll_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_deserialize_partial() {
        let toml = r#"
            plugin_dir = "/run/plugins"
            kubelet_socket = "/run/plugins/kubelet.sock"
            dial_timeout_secs = 2
        "#;

        let config: DpmConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.plugin_dir, PathBuf::from("/run/plugins"));
        assert_eq!(config.dial_timeout(), Duration::from_secs(2));
        assert_eq!(config.ready_poll_attempts, 10);
        assert_eq!(config.resource_namespace, "devices.kubevirt.io");
    }
}
