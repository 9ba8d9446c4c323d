//! 主程序配置
//!
//! 从 TOML 文件加载，包含设备插件管理器、KVM 插件以及日志配置

use dpm::DpmConfig;
use kvm::KvmConfig;
use serde::{Deserialize, Serialize};

/// kubedev 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubedevConfig {
    /// 实例名称（用于日志）
    #[serde(default = "default_name")]
    pub name: String,

    /// PID 文件路径，未配置时不写 PID 文件
    #[serde(default)]
    pub pid: Option<String>,

    /// 设备插件管理器配置
    #[serde(default)]
    pub device_plugin: DpmConfig,

    /// KVM 插件配置
    #[serde(default)]
    pub kvm: KvmConfig,

    /// 可观测性配置
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// 可观测性配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// 过滤级别
    ///
    /// 支持 EnvFilter 语法（如 "info,h2=warn"）。默认值 "info"。
    #[serde(default = "default_filter_level")]
    pub filter_level: String,

    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志输出目标
    ///
    /// - "console": 仅输出到控制台（默认）
    /// - "file": 输出到文件
    #[serde(default = "default_log_output")]
    pub output: String,

    /// 当 output = "file" 时有效：true 按天轮转，false 追加到单个文件
    #[serde(default)]
    pub rotate: bool,

    /// 日志目录，当 output = "file" 时有效
    #[serde(default = "default_log_path")]
    pub path: String,
}

fn default_name() -> String {
    "kubedev".to_string()
}

fn default_filter_level() -> String {
    "info".to_string()
}

fn default_log_output() -> String {
    "console".to_string()
}

fn default_log_path() -> String {
    "logs/".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter_level: default_filter_level(),
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: default_log_output(),
            rotate: false,
            path: default_log_path(),
        }
    }
}

impl Default for KubedevConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            pid: None,
            device_plugin: DpmConfig::default(),
            kvm: KvmConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl KubedevConfig {
    /// 从文件加载配置
    pub fn from_file<P: AsRef<std::path::Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(format!("Configuration file does not exist: {path_ref:?}").into());
        }

        if !path_ref.is_file() {
            return Err(format!("Path is not a valid file: {path_ref:?}").into());
        }

        let content = std::fs::read_to_string(path_ref)?;
        let config: KubedevConfig = toml::from_str(&content)?;

        Ok(config)
    }

    /// 从 TOML 字符串加载配置
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn get_pid_path(&self) -> Option<&str> {
        self.pid.as_deref()
    }

    /// 验证配置
    ///
    /// 以 "Warning:" 开头的条目不影响启动
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Instance name cannot be empty".to_string());
        }

        // 验证过滤级别（EnvFilter 语法）
        let main_level = self
            .observability
            .filter_level
            .split(',')
            .next()
            .unwrap_or("")
            .trim();
        if !["trace", "debug", "info", "warn", "error"].contains(&main_level) {
            errors.push(format!(
                "Invalid filter level '{}', must start with one of: trace, debug, info, warn, error",
                self.observability.filter_level
            ));
        }

        if !["console", "file"].contains(&self.observability.log.output.as_str()) {
            errors.push(format!(
                "Invalid log output '{}' (observability.log.output), must be 'console' or 'file'",
                self.observability.log.output
            ));
        }

        if let Err(e) = self.device_plugin.validate() {
            errors.push(format!("[device_plugin] {e}"));
        }

        if let Err(e) = self.kvm.validate() {
            errors.push(format!("[kvm] {e}"));
        }

        if !self.device_plugin.plugin_dir.exists() {
            errors.push(format!(
                "Warning: plugin_dir {:?} does not exist yet",
                self.device_plugin.plugin_dir
            ));
        }

        if !self.kvm.device_path.exists() {
            errors.push(format!(
                "Warning: {:?} not found, no KVM device will be advertised",
                self.kvm.device_path
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
