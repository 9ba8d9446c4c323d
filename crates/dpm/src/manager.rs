//! Runs one plugin server per discovered resource type
//!
//! The kubelet forgets every registration when it restarts, and it signals a
//! restart by re-creating its socket. The manager polls the socket's identity
//! and restarts (and so re-registers) all plugins when it changes.

use crate::config::DpmConfig;
use crate::error::Result;
use crate::lifecycle::PluginServer;
use crate::plugin::{DeviceLister, ResourcePlugin};
use crate::transport::SocketIdentity;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Manager<L: DeviceLister> {
    lister: L,
    config: DpmConfig,
}

impl<L: DeviceLister> Manager<L> {
    pub fn new(lister: L, config: DpmConfig) -> Self {
        Self { lister, config }
    }

    pub fn config(&self) -> &DpmConfig {
        &self.config
    }

    /// Discover devices and build one (stopped) server per resource type.
    pub fn build_plugins(&self) -> Result<Vec<PluginServer<L::Plugin>>> {
        let discovered = self.lister.discover();
        info!("Discovered {} resource type(s)", discovered.len());

        discovered
            .into_iter()
            .map(|(name, ids)| {
                info!("Resource {}: {} device(s)", name, ids.len());
                let plugin = Arc::new(self.lister.new_plugin(&name, ids));
                PluginServer::for_resource(&name, &self.config, plugin)
            })
            .collect()
    }

    /// Serve until `shutdown` fires, then stop every plugin.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        self.config.validate()?;
        let plugins = self.build_plugins()?;

        if plugins.is_empty() {
            warn!("No devices found, nothing to advertise");
            shutdown.cancelled().await;
            return Ok(());
        }

        let kubelet_socket = self.config.kubelet_socket.clone();
        let mut kubelet = SocketIdentity::of(&kubelet_socket);
        if kubelet.is_none() {
            warn!("Kubelet socket {:?} does not exist yet", kubelet_socket);
        }

        let mut ticker = tokio::time::interval(self.config.watch_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut cancelled = !start_until(&plugins, &shutdown).await;
        while !cancelled {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping device plugins");
                    cancelled = true;
                }
                _ = ticker.tick() => {
                    let current = SocketIdentity::of(&kubelet_socket);
                    if current == kubelet {
                        continue;
                    }
                    kubelet = current;

                    if current.is_some() {
                        info!("Kubelet socket re-created, restarting device plugins");
                        stop_all(&plugins).await;
                        cancelled = !start_until(&plugins, &shutdown).await;
                    } else {
                        warn!("Kubelet socket removed, stopping device plugins");
                        stop_all(&plugins).await;
                    }
                }
            }
        }

        stop_all(&plugins).await;
        Ok(())
    }
}

/// [`start_all`], abandoned as soon as `shutdown` fires. Returns false when
/// shutdown won.
async fn start_until<P: ResourcePlugin>(
    plugins: &[PluginServer<P>],
    shutdown: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => {
            info!("Shutdown requested while device plugins were starting");
            false
        }
        _ = start_all(plugins) => true,
    }
}

/// Start every plugin concurrently. Returns how many are running.
pub async fn start_all<P: ResourcePlugin>(plugins: &[PluginServer<P>]) -> usize {
    let results = join_all(plugins.iter().map(|plugin| plugin.start())).await;

    let mut running = 0;
    for (plugin, result) in plugins.iter().zip(results) {
        match result {
            Ok(()) => running += 1,
            Err(e) => error!(
                "Device plugin {} failed to start: {}",
                plugin.endpoint().resource_name(),
                e
            ),
        }
    }

    info!("{}/{} device plugin(s) running", running, plugins.len());
    running
}

pub async fn stop_all<P: ResourcePlugin>(plugins: &[PluginServer<P>]) {
    let results = join_all(plugins.iter().map(|plugin| plugin.stop())).await;

    for (plugin, result) in plugins.iter().zip(results) {
        if let Err(e) = result {
            error!(
                "Device plugin {} failed to stop cleanly: {}",
                plugin.endpoint().resource_name(),
                e
            );
        }
    }
}
