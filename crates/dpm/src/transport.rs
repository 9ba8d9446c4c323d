//! Unix domain socket plumbing for tonic
//!
//! Both directions of the device plugin protocol run over unix sockets: the
//! plugin serves on its own socket and dials the kubelet's.

use hyper_util::rt::TokioIo;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, warn};

use crate::error::DpmError;

/// Dial a gRPC server listening on `path`.
///
/// `timeout` bounds connection establishment only; long-lived calls such as
/// `ListAndWatch` are not cut off. The URI is required by tonic but ignored
/// by the connector.
pub async fn connect_unix(
    path: impl AsRef<Path>,
    timeout: Duration,
) -> Result<Channel, tonic::transport::Error> {
    let path = path.as_ref().to_path_buf();
    debug!("Dialing unix socket {:?}", path);

    Endpoint::from_static("http://[::]:50051")
        .connect_timeout(timeout)
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = path.clone();
            async move {
                let stream = UnixStream::connect(path).await?;
                Ok::<_, std::io::Error>(TokioIo::new(stream))
            }
        }))
        .await
}

/// Remove a socket file, treating a missing file as success.
pub fn remove_socket(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed socket {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!("Could not clean up socket {:?}: {}", path, e);
            Err(e)
        }
    }
}

/// Identity of a socket file, used to notice that it has been re-created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketIdentity {
    dev: u64,
    ino: u64,
}

impl SocketIdentity {
    /// `None` if nothing exists at `path`.
    pub fn of(path: &Path) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;

        std::fs::metadata(path).ok().map(|meta| Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }
}

/// Final path component of a socket, as the kubelet expects it.
pub fn socket_basename(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

/// Where one plugin instance listens and what it advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEndpoint {
    socket: PathBuf,
    basename: String,
    resource_name: String,
}

impl PluginEndpoint {
    /// Endpoint of one plugin instance. Both values are fixed for its lifetime.
    pub fn new(
        socket: impl Into<PathBuf>,
        resource_name: impl Into<String>,
    ) -> Result<Self, DpmError> {
        let socket = socket.into();
        let resource_name = resource_name.into();

        let basename = socket_basename(&socket).ok_or_else(|| {
            DpmError::Config(format!("plugin socket has no file name: {socket:?}"))
        })?;

        if resource_name.trim().is_empty() {
            return Err(DpmError::Config(
                "resource_name cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            socket,
            basename,
            resource_name,
        })
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Socket file name, sent to the kubelet as the registration endpoint.
    pub fn basename(&self) -> &str {
        &self.basename
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }
}
