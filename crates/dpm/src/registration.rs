//! Registration handshake with the kubelet

use crate::error::RegistrationError;
use crate::transport::{PluginEndpoint, connect_unix};
use kubedev_proto::{RegisterRequest, RegistrationClient, VERSION};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Request announcing `endpoint` to the kubelet.
pub fn register_request(endpoint: &PluginEndpoint) -> RegisterRequest {
    RegisterRequest {
        version: VERSION.to_string(),
        endpoint: endpoint.basename().to_string(),
        resource_name: endpoint.resource_name().to_string(),
    }
}

/// Register `endpoint` with the kubelet listening on `kubelet_socket`.
///
/// One call, no retry. Dialing and the call itself are each bounded by
/// `dial_timeout`.
pub async fn register(
    kubelet_socket: &Path,
    dial_timeout: Duration,
    endpoint: &PluginEndpoint,
) -> Result<(), RegistrationError> {
    let channel = tokio::time::timeout(dial_timeout, connect_unix(kubelet_socket, dial_timeout))
        .await
        .map_err(|_| RegistrationError::DialTimeout {
            path: kubelet_socket.to_path_buf(),
            timeout: dial_timeout,
        })?
        .map_err(|source| RegistrationError::Dial {
            path: kubelet_socket.to_path_buf(),
            source,
        })?;

    let request = register_request(endpoint);
    debug!(
        "Registering {} (endpoint {}, version {})",
        request.resource_name, request.endpoint, request.version
    );

    let mut client = RegistrationClient::new(channel);
    tokio::time::timeout(dial_timeout, client.register(request))
        .await
        .map_err(|_| RegistrationError::Unanswered {
            path: kubelet_socket.to_path_buf(),
            timeout: dial_timeout,
        })??;

    info!(
        "Registered {} with kubelet at {:?}",
        endpoint.resource_name(),
        kubelet_socket
    );
    Ok(())
}
