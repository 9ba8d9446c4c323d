//! Plugin server lifecycle
//!
//! [`PluginServer`] owns the unix socket, the gRPC server task and the
//! [`PluginState`] of one plugin instance:
//!
//! ```text
//!            start()                 ready + registered
//!   Stopped ────────► Starting ─────────────────────────► Running
//!      ▲                  │                                  │
//!      │   bind/register  │                                  │ stop()
//!      └──────────────────┴──────────────────────────────────┘
//! ```
//!
//! Every transition happens while holding one async mutex, so at most one
//! bring-up is in flight. Callers that queued behind a failed bring-up get
//! that attempt's error instead of starting another one.

use crate::config::DpmConfig;
use crate::error::{DpmError, Result};
use crate::plugin::ResourcePlugin;
use crate::registration;
use crate::service::DevicePluginService;
use crate::transport::{PluginEndpoint, connect_unix, remove_socket};
use kubedev_proto::DevicePluginServer;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use strum::Display;
use tokio::net::UnixListener;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::server::NamedService;
use tonic::transport::Server;
use tonic_health::pb::HealthCheckRequest;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tracing::{debug, info, warn};

/// Lifecycle state of a plugin server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PluginState {
    Stopped,
    Starting,
    Running,
}

type ServeHandle = JoinHandle<std::result::Result<(), tonic::transport::Error>>;

/// A spawned gRPC server and the token that stops it.
struct ServerTask {
    shutdown: CancellationToken,
    handle: ServeHandle,
}

/// Tears down a bring-up whose future was dropped before it finished.
struct PendingServer<'a> {
    shutdown: CancellationToken,
    socket: &'a Path,
    state: &'a watch::Sender<PluginState>,
    armed: bool,
}

impl PendingServer<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingServer<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Bring-up on {:?} abandoned, tearing down", self.socket);
        self.shutdown.cancel();
        if let Err(e) = remove_socket(self.socket) {
            warn!("Failed to remove {:?}: {}", self.socket, e);
        }
        self.state.send_replace(PluginState::Stopped);
    }
}

#[derive(Default)]
struct Inner {
    server: Option<ServerTask>,
    /// Number of the attempt that failed last, and its error.
    last_failure: Option<(u64, Arc<DpmError>)>,
}

/// Lifecycle engine for one device plugin.
pub struct PluginServer<P> {
    endpoint: PluginEndpoint,
    config: DpmConfig,
    plugin: Arc<P>,
    inner: Mutex<Inner>,
    /// Finished start attempts. Read before queueing on `inner`.
    attempts: AtomicU64,
    state: watch::Sender<PluginState>,
}

impl<P: ResourcePlugin> PluginServer<P> {
    pub fn new(endpoint: PluginEndpoint, config: DpmConfig, plugin: Arc<P>) -> Self {
        let (state, _) = watch::channel(PluginState::Stopped);
        Self {
            endpoint,
            config,
            plugin,
            inner: Mutex::new(Inner::default()),
            attempts: AtomicU64::new(0),
            state,
        }
    }

    /// Server for resource type `name`, with socket and resource name
    /// derived from `config`.
    pub fn for_resource(name: &str, config: &DpmConfig, plugin: Arc<P>) -> Result<Self> {
        let endpoint = PluginEndpoint::new(config.socket_for(name), config.resource_name_for(name))?;
        Ok(Self::new(endpoint, config.clone(), plugin))
    }

    pub fn endpoint(&self) -> &PluginEndpoint {
        &self.endpoint
    }

    pub fn plugin(&self) -> &Arc<P> {
        &self.plugin
    }

    pub fn state(&self) -> PluginState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<PluginState> {
        self.state.subscribe()
    }

    /// Bring the server up and register it with the kubelet.
    ///
    /// Succeeds without re-registering when already running. Any failure
    /// leaves the plugin stopped with its socket removed, and so does
    /// dropping the returned future before it completes.
    pub async fn start(&self) -> Result<()> {
        let observed = self.attempts.load(Ordering::Acquire);
        let mut inner = self.inner.lock().await;

        if let Some(server) = &inner.server {
            if !server.handle.is_finished() {
                debug!("{} already running", self.endpoint.resource_name());
                return Ok(());
            }
            warn!(
                "gRPC server for {} exited on its own, restarting",
                self.endpoint.resource_name()
            );
            inner.server = None;
        }

        // An attempt finished while we were queued and it failed: report it.
        if let Some((attempt, error)) = &inner.last_failure
            && *attempt > observed
        {
            return Err(DpmError::Start(error.clone()));
        }

        info!(
            "Starting device plugin {} on {:?}",
            self.endpoint.resource_name(),
            self.endpoint.socket()
        );
        self.state.send_replace(PluginState::Starting);

        match self.bring_up().await {
            Ok(server) => {
                inner.server = Some(server);
                inner.last_failure = None;
                self.attempts.fetch_add(1, Ordering::AcqRel);
                info!("Device plugin {} is running", self.endpoint.resource_name());
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Failed to start device plugin {}: {}",
                    self.endpoint.resource_name(),
                    e
                );
                let error = Arc::new(e);
                let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
                inner.last_failure = Some((attempt, error.clone()));
                self.state.send_replace(PluginState::Stopped);
                Err(DpmError::Start(error))
            }
        }
    }

    /// Stop the server and remove its socket. No-op when not running.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(server) = inner.server.take() else {
            debug!("{} already stopped", self.endpoint.resource_name());
            return Ok(());
        };

        info!("Stopping device plugin {}", self.endpoint.resource_name());
        self.shutdown(server).await;
        self.state.send_replace(PluginState::Stopped);
        self.cleanup_socket()
    }

    async fn bring_up(&self) -> Result<ServerTask> {
        self.cleanup_socket()?;
        let server = self.serve().await?;
        let pending = PendingServer {
            shutdown: server.shutdown.clone(),
            socket: self.endpoint.socket(),
            state: &self.state,
            armed: true,
        };

        self.wait_ready().await;
        self.state.send_replace(PluginState::Running);

        let registered = registration::register(
            &self.config.kubelet_socket,
            self.config.dial_timeout(),
            &self.endpoint,
        )
        .await;
        pending.disarm();

        if let Err(e) = registered {
            self.shutdown(server).await;
            if let Err(cleanup) = self.cleanup_socket() {
                warn!("Socket cleanup after failed registration: {}", cleanup);
            }
            return Err(e.into());
        }

        Ok(server)
    }

    /// Bind the socket and spawn the gRPC server on it.
    async fn serve(&self) -> Result<ServerTask> {
        let socket = self.endpoint.socket();
        let listener = UnixListener::bind(socket).map_err(|source| DpmError::SocketBind {
            path: socket.to_path_buf(),
            source,
        })?;

        let (health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<DevicePluginServer<DevicePluginService<P>>>()
            .await;

        let shutdown = CancellationToken::new();
        let service = DevicePluginService::new(
            self.plugin.clone(),
            self.endpoint.resource_name(),
            shutdown.clone(),
        );
        let incoming = UnixListenerStream::new(listener);
        let signal = shutdown.clone();

        let handle = tokio::spawn(async move {
            Server::builder()
                .add_service(health_service)
                .add_service(DevicePluginServer::new(service))
                .serve_with_incoming_shutdown(incoming, signal.cancelled_owned())
                .await
        });

        debug!("gRPC server spawned on {:?}", socket);
        Ok(ServerTask { shutdown, handle })
    }

    /// Poll the health service over the plugin's own socket.
    ///
    /// Gives up after the configured number of attempts; the caller proceeds
    /// either way. A single probe never outlasts the poll interval.
    async fn wait_ready(&self) -> bool {
        let service = <DevicePluginServer<DevicePluginService<P>> as NamedService>::NAME;
        let attempts = self.config.ready_poll_attempts;
        let budget = self
            .config
            .ready_poll_interval()
            .min(self.config.dial_timeout());

        for attempt in 1..=attempts {
            match tokio::time::timeout(budget, self.probe(service, budget)).await {
                Ok(Ok(true)) => {
                    debug!("{} ready after {} probe(s)", service, attempt);
                    return true;
                }
                Ok(Ok(false)) => debug!("{} not serving yet", service),
                Ok(Err(e)) => debug!("Readiness probe {} failed: {:#}", attempt, e),
                Err(_) => debug!("Readiness probe {} timed out after {:?}", attempt, budget),
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.ready_poll_interval()).await;
            }
        }

        warn!(
            "{} did not report ready after {} probes, registering anyway",
            self.endpoint.resource_name(),
            attempts
        );
        false
    }

    async fn probe(&self, service: &str, dial_timeout: std::time::Duration) -> anyhow::Result<bool> {
        let channel = connect_unix(self.endpoint.socket(), dial_timeout).await?;
        let response = HealthClient::new(channel)
            .check(HealthCheckRequest {
                service: service.to_string(),
            })
            .await?;
        Ok(response.into_inner().status == ServingStatus::Serving as i32)
    }

    async fn shutdown(&self, server: ServerTask) {
        let ServerTask {
            shutdown,
            mut handle,
        } = server;
        shutdown.cancel();

        match tokio::time::timeout(self.config.stop_timeout(), &mut handle).await {
            Ok(Ok(Ok(()))) => debug!("gRPC server stopped"),
            Ok(Ok(Err(e))) => warn!("gRPC server exited with error: {}", e),
            Ok(Err(e)) => warn!("gRPC server task failed: {}", e),
            Err(_) => {
                warn!(
                    "gRPC server did not stop within {:?}, aborting",
                    self.config.stop_timeout()
                );
                handle.abort();
            }
        }
    }

    fn cleanup_socket(&self) -> Result<()> {
        let socket = self.endpoint.socket();
        remove_socket(socket).map_err(|source| DpmError::SocketCleanup {
            path: socket.to_path_buf(),
            source,
        })
    }
}

impl<P> Drop for PluginServer<P> {
    fn drop(&mut self) {
        if let Some(server) = self.inner.get_mut().server.take() {
            server.shutdown.cancel();
            if let Err(e) = remove_socket(self.endpoint.socket()) {
                warn!("Failed to remove {:?} on drop: {}", self.endpoint.socket(), e);
            }
        }
    }
}
