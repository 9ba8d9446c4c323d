use crate::device::DeviceInventory;
use crate::plugin::ResourcePlugin;
use kubedev_proto::{AllocateRequest, AllocateResponse, DevicePlugin, Empty, ListAndWatchResponse};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

type GrpcResult<T> = std::result::Result<T, Status>;

/// Snapshots queued per subscriber before the streaming task waits.
const SNAPSHOT_BUFFER: usize = 4;

/// Stream of inventory snapshots, as returned by `ListAndWatch`.
pub type SnapshotStream = ReceiverStream<GrpcResult<ListAndWatchResponse>>;

/// DevicePlugin gRPC service backed by a [`ResourcePlugin`].
///
/// Created per server run. Cancelling `shutdown` ends every open
/// `ListAndWatch` stream so the server can finish its graceful shutdown.
pub struct DevicePluginService<P> {
    plugin: Arc<P>,
    resource_name: Arc<str>,
    shutdown: CancellationToken,
}

impl<P> Clone for DevicePluginService<P> {
    fn clone(&self) -> Self {
        Self {
            plugin: self.plugin.clone(),
            resource_name: self.resource_name.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<P: ResourcePlugin> DevicePluginService<P> {
    pub fn new(
        plugin: Arc<P>,
        resource_name: impl Into<Arc<str>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            plugin,
            resource_name: resource_name.into(),
            shutdown,
        }
    }
}

/// Spawn the task feeding one `ListAndWatch` subscriber.
///
/// The first snapshot goes out immediately; after that a fresh snapshot is
/// sent whenever the inventory signals a change. The task ends when the
/// subscriber goes away, the inventory is dropped or `shutdown` fires.
pub fn snapshot_stream(inventory: DeviceInventory, shutdown: CancellationToken) -> SnapshotStream {
    let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);

    tokio::spawn(async move {
        // Subscribe before reading so a change racing the first snapshot
        // still produces a second one.
        let mut updates = inventory.subscribe();

        loop {
            let snapshot = inventory.to_response().await;
            debug!("Sending inventory snapshot with {} devices", snapshot.devices.len());

            tokio::select! {
                _ = shutdown.cancelled() => break,
                sent = tx.send(Ok(snapshot)) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tx.closed() => break,
                alive = updates.changed() => {
                    if !alive {
                        break;
                    }
                }
            }
        }

        debug!("ListAndWatch stream closed");
    });

    ReceiverStream::new(rx)
}

#[tonic::async_trait]
impl<P: ResourcePlugin> DevicePlugin for DevicePluginService<P> {
    type ListAndWatchStream = SnapshotStream;

    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> GrpcResult<Response<Self::ListAndWatchStream>> {
        info!("ListAndWatch subscription for {}", self.resource_name);
        let stream = snapshot_stream(
            self.plugin.inventory().clone(),
            self.shutdown.child_token(),
        );
        Ok(Response::new(stream))
    }

    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> GrpcResult<Response<AllocateResponse>> {
        let req = request.into_inner();
        info!(
            "Allocate request for {}: devices={:?}",
            self.resource_name, req.devices_ids
        );

        match self.plugin.allocate(req).await {
            Ok(response) => {
                debug!(
                    "Allocated {} device specs for {}",
                    response.devices.len(),
                    self.resource_name
                );
                Ok(Response::new(response))
            }
            Err(status) => {
                warn!("Allocate failed for {}: {}", self.resource_name, status);
                Err(status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    struct StaticPlugin {
        inventory: DeviceInventory,
    }

    #[async_trait]
    impl ResourcePlugin for StaticPlugin {
        fn inventory(&self) -> &DeviceInventory {
            &self.inventory
        }

        async fn allocate(&self, _request: AllocateRequest) -> GrpcResult<AllocateResponse> {
            Err(Status::unimplemented("static"))
        }
    }

    async fn next_ids(stream: &mut SnapshotStream) -> Vec<String> {
        let item = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("snapshot in time")
            .expect("stream open")
            .expect("snapshot ok");
        item.devices.into_iter().map(|d| d.id).collect()
    }

    #[tokio::test]
    async fn test_first_snapshot_is_current_inventory() {
        let inventory = DeviceInventory::from_ids(["dev0", "dev1"]);
        let mut stream = snapshot_stream(inventory, CancellationToken::new());

        assert_eq!(next_ids(&mut stream).await, vec!["dev0", "dev1"]);
    }

    #[tokio::test]
    async fn test_mutation_produces_new_snapshot() {
        let inventory = DeviceInventory::from_ids(["dev0"]);
        let mut stream = snapshot_stream(inventory.clone(), CancellationToken::new());
        assert_eq!(next_ids(&mut stream).await, vec!["dev0"]);

        inventory.add(Device::healthy("dev1")).await.unwrap();
        assert_eq!(next_ids(&mut stream).await, vec!["dev0", "dev1"]);
    }

    #[tokio::test]
    async fn test_no_snapshot_without_signal() {
        let inventory = DeviceInventory::from_ids(["dev0"]);
        let mut stream = snapshot_stream(inventory, CancellationToken::new());
        next_ids(&mut stream).await;

        let idle = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
        assert!(idle.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_ends_stream() {
        let inventory = DeviceInventory::from_ids(["dev0"]);
        let shutdown = CancellationToken::new();
        let mut stream = snapshot_stream(inventory, shutdown.clone());
        next_ids(&mut stream).await;

        shutdown.cancel();
        let end = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream should end");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_service_allocate_passes_status_through() {
        let plugin = Arc::new(StaticPlugin {
            inventory: DeviceInventory::from_ids(["dev0"]),
        });
        let service = DevicePluginService::new(plugin, "example.com/static", CancellationToken::new());

        let err = service
            .allocate(Request::new(AllocateRequest {
                devices_ids: vec!["dev0".to_string()],
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unimplemented);
    }
}
