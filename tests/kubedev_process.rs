use std::{
    fs,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serial_test::serial;
use tokio::net::UnixListener;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, transport::Server};

use kubedev_proto::{
    AllocateRequest, DevicePluginClient, Empty, RegisterRequest, Registration, RegistrationServer,
};

const START_TIMEOUT: Duration = Duration::from_secs(15);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Default)]
struct CountingKubelet {
    registrations: Arc<AtomicUsize>,
    last: Arc<std::sync::Mutex<Option<RegisterRequest>>>,
}

#[tonic::async_trait]
impl Registration for CountingKubelet {
    async fn register(&self, request: Request<RegisterRequest>) -> Result<Response<Empty>, Status> {
        if let Ok(mut last) = self.last.lock() {
            *last = Some(request.into_inner());
        }
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(Empty {}))
    }
}

fn write_config(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let plugin_dir = dir.join("device-plugins");
    fs::create_dir_all(&plugin_dir).expect("create plugin dir");
    let device = dir.join("kvm");
    fs::write(&device, b"").expect("create fake device");
    let pid = dir.join("kubedev.pid");

    let config_path = dir.join("config.toml");
    fs::write(
        &config_path,
        format!(
            r#"
name = "kubedev-process-test"
pid = "{pid}"

[device_plugin]
plugin_dir = "{plugin_dir}"
kubelet_socket = "{plugin_dir}/kubelet.sock"
ready_poll_interval_ms = 100
watch_interval_secs = 1

[kvm]
device_path = "{device}"
container_path = "/dev/kvm"

[observability]
filter_level = "debug"
"#,
            pid = pid.display(),
            plugin_dir = plugin_dir.display(),
            device = device.display(),
        ),
    )
    .expect("write config");

    (config_path, plugin_dir, pid)
}

fn spawn_kubedev(config: &Path, log_path: &Path) -> Child {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_kubedev"));
    let log_file = fs::File::create(log_path).expect("create log file");
    Command::new(bin)
        .arg("--config")
        .arg(config)
        .stdout(Stdio::from(log_file.try_clone().expect("dup log")))
        .stderr(Stdio::from(log_file))
        .spawn()
        .expect("spawn kubedev")
}

async fn wait_until(child: &mut Child, log_path: &Path, what: &str, mut ready: impl FnMut() -> bool) {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().unwrap_or(None) {
            let log = fs::read_to_string(log_path).unwrap_or_default();
            panic!("kubedev exited early: status={status:?}\nlogs:\n{log}");
        }
        if ready() {
            return;
        }
        if start.elapsed() > START_TIMEOUT {
            let log = fs::read_to_string(log_path).unwrap_or_default();
            panic!("timed out waiting for {what}\nlogs:\n{log}");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn terminate(mut child: Child) -> std::process::ExitStatus {
    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).expect("send SIGTERM");
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("wait kubedev") {
            return status;
        }
        if start.elapsed() > SHUTDOWN_TIMEOUT {
            let _ = child.kill();
            panic!("kubedev did not exit after SIGTERM");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
#[serial]
async fn kubedev_registers_serves_kvm_and_shuts_down() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let (config_path, plugin_dir, pid_path) = write_config(tmp.path());
    let log_path = tmp.path().join("kubedev.log");

    let kubelet_socket = plugin_dir.join("kubelet.sock");
    let kubelet = CountingKubelet::default();
    let listener = UnixListener::bind(&kubelet_socket).expect("bind kubelet socket");
    let shutdown = CancellationToken::new();
    let server = tokio::spawn({
        let service = kubelet.clone();
        let signal = shutdown.clone();
        async move {
            Server::builder()
                .add_service(RegistrationServer::new(service))
                .serve_with_incoming_shutdown(UnixListenerStream::new(listener), signal.cancelled_owned())
                .await
        }
    });

    let mut child = spawn_kubedev(&config_path, &log_path);

    let registrations = kubelet.registrations.clone();
    wait_until(&mut child, &log_path, "registration", || {
        registrations.load(Ordering::SeqCst) >= 1
    })
    .await;
    assert!(pid_path.exists(), "PID file should be written");

    let request = kubelet.last.lock().expect("lock").clone().expect("request");
    assert_eq!(request.version, "v1alpha");
    assert_eq!(request.endpoint, "kvm.sock");
    assert_eq!(request.resource_name, "devices.kubevirt.io/kvm");

    let plugin_socket = plugin_dir.join("kvm.sock");
    let channel = dpm::connect_unix(&plugin_socket, Duration::from_secs(2))
        .await
        .expect("dial kvm plugin");
    let mut client = DevicePluginClient::new(channel);
    let mut stream = client
        .list_and_watch(Empty {})
        .await
        .expect("list and watch")
        .into_inner();

    let first = stream.next().await.expect("snapshot").expect("snapshot ok");
    let ids: Vec<_> = first.devices.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["kvm"]);

    let response = client
        .allocate(AllocateRequest {
            devices_ids: vec!["kvm".to_string()],
        })
        .await
        .expect("allocate")
        .into_inner();
    assert_eq!(response.devices.len(), 1);
    assert_eq!(response.devices[0].container_path, "/dev/kvm");
    assert_eq!(response.devices[0].permissions, "rw");

    let grown = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("snapshot after allocate")
        .expect("stream open")
        .expect("snapshot ok");
    let ids: Vec<_> = grown.devices.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["kvm", "kvm0"]);

    drop(stream);
    drop(client);

    let status = terminate(child).await;
    assert!(status.success(), "kubedev should exit cleanly: {status:?}");
    assert!(!pid_path.exists(), "PID file should be removed");
    assert!(!plugin_socket.exists(), "plugin socket should be removed");

    shutdown.cancel();
    let _ = server.await;
}
