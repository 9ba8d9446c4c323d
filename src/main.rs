//! kubedev 主程序
//!
//! 发现主机设备并以 kubelet 设备插件的形式对外提供

mod cli;
mod error;
mod observability;
mod process;

use clap::Parser;
use dpm::Manager;
use kubedev::KubedevConfig;
use kvm::KvmLister;
use observability::init_observability;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

macro_rules! bootstrap_info {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}

macro_rules! bootstrap_error {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

use cli::{Cli, Commands};
use error::{Error, Result};

/// Application launcher utilities
struct ApplicationLauncher;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Test { config_file }) => {
            let config_path =
                ApplicationLauncher::find_config_file(config_file.as_ref().unwrap_or(&cli.config))?;
            ApplicationLauncher::test_config_file(&config_path)
        }
        None => {
            let config_path = ApplicationLauncher::find_config_file(&cli.config)?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;

            runtime.block_on(ApplicationLauncher::run_application(&config_path))
        }
    }
}

impl ApplicationLauncher {
    /// Find config file with fallback locations
    fn find_config_file(provided_path: &PathBuf) -> Result<PathBuf> {
        // An explicit path other than the default must exist
        if provided_path != Path::new("config.toml") {
            if provided_path.exists() {
                bootstrap_info!("Using provided config file: {:?}", provided_path);
                return Ok(provided_path.clone());
            } else {
                bootstrap_error!("Provided config file not found: {:?}", provided_path);
                return Err(Error::custom(format!(
                    "Config file not found: {provided_path:?}"
                )));
            }
        }

        let fallback_paths = vec![
            // 1. Current working directory
            PathBuf::from("config.toml"),
            // 2. System config directory
            PathBuf::from("/etc/kubedev/config.toml"),
        ];

        bootstrap_info!("Searching for config file in default locations...");

        for path in &fallback_paths {
            if path.exists() {
                bootstrap_info!("Found config file: {:?}", path);
                return Ok(path.clone());
            } else {
                bootstrap_info!("Config not found at: {:?}", path);
            }
        }

        bootstrap_error!("No configuration file found!");
        bootstrap_error!("Please create a config file in one of these locations:");
        for (i, path) in fallback_paths.iter().enumerate() {
            bootstrap_error!("  {}. {:?}", i + 1, path);
        }
        bootstrap_error!("Or specify a custom path with: kubedev --config <path>");

        Err(Error::custom(
            "No configuration file found. Please create one or specify path with --config",
        ))
    }

    /// 测试配置文件是否有效
    fn test_config_file(config_path: &Path) -> Result<()> {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();

        match KubedevConfig::from_file(config_path) {
            Ok(config) => {
                info!("✅ 配置文件解析成功: {:?}", config_path);

                if let Err(errors) = config.validate() {
                    error!("❌ 配置验证发现问题:");
                    for (i, err) in errors.iter().enumerate() {
                        if err.starts_with("Warning:") {
                            info!("  {}. ⚠️  {}", i + 1, err);
                        } else {
                            error!("  {}. ❌ {}", i + 1, err);
                        }
                    }
                    let has_errors = errors.iter().any(|e| !e.starts_with("Warning:"));
                    if has_errors {
                        return Err(Error::service_validation("配置验证失败"));
                    }
                }

                info!("✅ 配置验证通过");
                Ok(())
            }
            Err(e) => {
                error!("❌ 配置文件解析失败: {}", e);
                Err(Error::service_validation(format!("配置解析失败: {e}")))
            }
        }
    }

    /// 运行应用程序的主入口
    async fn run_application(config_path: &Path) -> Result<()> {
        bootstrap_info!("📄 加载配置文件: {:?}", config_path);

        let config = match KubedevConfig::from_file(config_path) {
            Ok(config) => {
                bootstrap_info!("✅ 配置加载成功");

                if let Err(errors) = config.validate() {
                    let mut has_critical_errors = false;
                    for (i, err) in errors.iter().enumerate() {
                        if err.starts_with("Warning:") {
                            bootstrap_info!("  {}. ⚠️  {}", i + 1, err);
                        } else {
                            bootstrap_error!("  {}. ❌ {}", i + 1, err);
                            has_critical_errors = true;
                        }
                    }
                    if has_critical_errors {
                        return Err(Error::Config("配置验证失败，请修复上述错误".to_string()));
                    }
                }

                config
            }
            Err(e) => {
                bootstrap_error!("❌ 配置加载失败: {}", e);
                return Err(Error::Config(format!("配置加载失败: {e}")));
            }
        };

        let _observability_guard = init_observability(&config)?;

        let pid_path = process::write_pid_file(config.get_pid_path())?;
        let _pid_guard = process::PidFileGuard::new(pid_path);

        Self::run_device_plugins(config).await
    }

    async fn run_device_plugins(config: KubedevConfig) -> Result<()> {
        info!("🚀 启动设备插件 ({})", config.name);
        info!(
            "  - 插件目录: {:?}, kubelet: {:?}",
            config.device_plugin.plugin_dir, config.device_plugin.kubelet_socket
        );
        info!(
            "  - KVM 设备: {:?} ({})",
            config.kvm.device_path, config.kvm.policy
        );

        let shutdown = CancellationToken::new();
        setup_signal_handler(shutdown.clone());

        let lister = KvmLister::new(config.kvm.clone())?;
        let manager = Manager::new(lister, config.device_plugin.clone());

        manager.run(shutdown).await?;

        info!("🛑 所有设备插件已安全关闭");
        Ok(())
    }
}

/// Ctrl-C 或 SIGTERM 触发优雅关闭
fn setup_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    error!("无法监听SIGTERM信号: {}", e);
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("无法监听Ctrl-C信号: {}", e);
                        return;
                    }
                    info!("收到Ctrl-C信号，开始优雅关闭...");
                    shutdown.cancel();
                    return;
                }
            };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("无法监听Ctrl-C信号: {}", e);
                    return;
                }
                info!("收到Ctrl-C信号，开始优雅关闭...");
            }
            _ = sigterm.recv() => {
                info!("收到SIGTERM信号，开始优雅关闭...");
            }
        }
        shutdown.cancel();
    });
}
