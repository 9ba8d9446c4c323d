//! Minimal kubelet Registration server for trying device plugins by hand.
//!
//! This binary serves the `Registration` service on a unix socket. For every
//! plugin that registers it dials the plugin socket (in the same directory),
//! subscribes to `ListAndWatch` and logs each inventory snapshot.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p dpm --bin fake_kubelet -- --dir /tmp/device-plugins
//! ```
//!
//! Optional flags:
//! - `--socket-name <name>`: Registration socket file name (default: kubelet.sock)
//! - `--allocate`: Send one `Allocate` for the first advertised device of every plugin

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::UnixListener;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::{Request, Response, Status, transport::Server};
use tracing::{error, info, warn};

use dpm::connect_unix;
use kubedev_proto::{
    AllocateRequest, DevicePluginClient, Empty, RegisterRequest, Registration, RegistrationServer,
    VERSION,
};

#[derive(Debug, Parser)]
#[command(name = "fake_kubelet")]
#[command(about = "Kubelet stand-in that accepts device plugin registrations")]
struct Args {
    /// Directory holding the kubelet socket and plugin sockets
    #[arg(long, default_value = "/tmp/device-plugins")]
    dir: PathBuf,

    /// Registration socket file name
    #[arg(long, default_value = "kubelet.sock")]
    socket_name: String,

    /// Allocate the first advertised device after registration
    #[arg(long, default_value_t = false)]
    allocate: bool,
}

#[derive(Clone)]
struct FakeKubelet {
    dir: PathBuf,
    allocate: bool,
}

#[tonic::async_trait]
impl Registration for FakeKubelet {
    async fn register(&self, request: Request<RegisterRequest>) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();

        info!("=== Register Request ===");
        info!("version: {}", req.version);
        info!("endpoint: {}", req.endpoint);
        info!("resource_name: {}", req.resource_name);

        if req.version != VERSION {
            return Err(Status::invalid_argument(format!(
                "unsupported version {}, expected {}",
                req.version, VERSION
            )));
        }

        if req.endpoint.is_empty() || req.endpoint.contains('/') {
            return Err(Status::invalid_argument("endpoint must be a socket file name"));
        }

        let socket = self.dir.join(&req.endpoint);
        let allocate = self.allocate;
        tokio::spawn(async move {
            if let Err(e) = watch_plugin(socket, req.resource_name.clone(), allocate).await {
                error!("Watching {} failed: {}", req.resource_name, e);
            }
        });

        Ok(Response::new(Empty {}))
    }
}

async fn watch_plugin(
    socket: PathBuf,
    resource_name: String,
    allocate: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let channel = connect_unix(&socket, Duration::from_secs(5)).await?;
    let mut client = DevicePluginClient::new(channel);
    let mut stream = client.list_and_watch(Empty {}).await?.into_inner();
    let mut allocated = !allocate;

    while let Some(item) = stream.next().await {
        let snapshot = item?;
        let devices: Vec<String> = snapshot
            .devices
            .iter()
            .map(|d| format!("{}({})", d.id, d.health))
            .collect();
        info!("{}: {} device(s) {:?}", resource_name, devices.len(), devices);

        if !allocated && let Some(first) = snapshot.devices.first() {
            allocated = true;
            let response = client
                .allocate(AllocateRequest {
                    devices_ids: vec![first.id.clone()],
                })
                .await?
                .into_inner();
            for spec in &response.devices {
                info!(
                    "{}: allocated {} -> {} ({})",
                    resource_name, spec.host_path, spec.container_path, spec.permissions
                );
            }
        }
    }

    warn!("{}: ListAndWatch stream ended", resource_name);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    std::fs::create_dir_all(&args.dir)?;
    let socket = args.dir.join(&args.socket_name);
    dpm::transport::remove_socket(&socket)?;

    let listener = UnixListener::bind(&socket)?;
    info!("Registration service listening on {:?}", socket);

    let service = FakeKubelet {
        dir: args.dir.clone(),
        allocate: args.allocate,
    };

    Server::builder()
        .add_service(RegistrationServer::new(service))
        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl-C received, shutting down");
        })
        .await?;

    dpm::transport::remove_socket(&socket)?;
    Ok(())
}
