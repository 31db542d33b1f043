//! Integration tests for the kubelet device plugin
//!
//! These tests run the real gRPC services over unix sockets in a scratch
//! directory, with a fake kubelet answering Registration.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mixedcpus::cpuset::Cpuset;
use mixedcpus::deviceplugin::{register, DevicePluginManager, MutualCpuPlugin};
use mixedcpus::grpc::deviceplugin_api::device_plugin_client::DevicePluginClient;
use mixedcpus::grpc::deviceplugin_api::registration_server::{Registration, RegistrationServer};
use mixedcpus::grpc::deviceplugin_api::{
    AllocateRequest, ContainerAllocateRequest, Empty, PreStartContainerRequest, RegisterRequest,
};
use mixedcpus::grpc::{bind_unix_listener, connect_unix, wait_for_socket};
use tokio::sync::watch;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_stream::StreamExt;
use tonic::transport::Server;
use tonic::{Code, Request, Response, Status};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Kubelet stand-in recording every registration
#[derive(Clone, Default)]
struct FakeKubelet {
    requests: Arc<Mutex<Vec<RegisterRequest>>>,
    reject: bool,
}

#[tonic::async_trait]
impl Registration for FakeKubelet {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<Empty>, Status> {
        self.requests.lock().unwrap().push(request.into_inner());
        if self.reject {
            return Err(Status::invalid_argument("unsupported version"));
        }
        Ok(Response::new(Empty {}))
    }
}

fn spawn_kubelet(dir: &Path, kubelet: FakeKubelet) {
    let listener = bind_unix_listener(&dir.join("kubelet.sock")).unwrap();
    tokio::spawn(
        Server::builder()
            .add_service(RegistrationServer::new(kubelet))
            .serve_with_incoming(UnixListenerStream::new(listener)),
    );
}

async fn wait_for_registrations(kubelet: &FakeKubelet, count: usize) {
    tokio::time::timeout(TIMEOUT, async {
        while kubelet.requests.lock().unwrap().len() < count {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("kubelet did not see the expected registrations");
}

#[tokio::test]
async fn test_register_sends_resource_and_endpoint() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    let kubelet = FakeKubelet::default();
    spawn_kubelet(dir, kubelet.clone());

    register(
        &dir.join("kubelet.sock"),
        "openshift.io_mutualcpu.sock",
        "openshift.io/mutualcpu",
    )
    .await
    .unwrap();

    let requests = kubelet.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].version, "v1beta1");
    assert_eq!(requests[0].endpoint, "openshift.io_mutualcpu.sock");
    assert_eq!(requests[0].resource_name, "openshift.io/mutualcpu");
    let options = requests[0].options.clone().unwrap();
    assert!(!options.pre_start_required);
    assert!(!options.get_preferred_allocation_available);
}

#[tokio::test]
async fn test_register_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    spawn_kubelet(
        dir,
        FakeKubelet {
            reject: true,
            ..Default::default()
        },
    );

    let err = register(
        &dir.join("kubelet.sock"),
        "openshift.io_mutualcpu.sock",
        "openshift.io/mutualcpu",
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("unsupported version"));
}

#[tokio::test]
async fn test_manager_serves_and_reregisters() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    let kubelet = FakeKubelet::default();
    spawn_kubelet(dir, kubelet.clone());

    let manager = DevicePluginManager::new(
        MutualCpuPlugin::new(Cpuset::parse("4-9").unwrap(), None),
        dir,
    )
    .with_intervals(Duration::from_millis(50), Duration::from_millis(50));
    let socket = manager.socket_path();
    assert_eq!(socket, dir.join("openshift.io_mutualcpu.sock"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { manager.run(shutdown_rx).await });

    wait_for_registrations(&kubelet, 1).await;
    assert_eq!(
        kubelet.requests.lock().unwrap()[0].resource_name,
        "openshift.io/mutualcpu"
    );
    wait_for_socket(&socket, TIMEOUT).await.unwrap();

    let mut client = DevicePluginClient::new(connect_unix(&socket).await.unwrap());

    let options = client
        .get_device_plugin_options(Empty {})
        .await
        .unwrap()
        .into_inner();
    assert!(!options.pre_start_required);

    // One list, sized to the mutual pool, then silence
    let mut stream = client.list_and_watch(Empty {}).await.unwrap().into_inner();
    let first = tokio::time::timeout(TIMEOUT, stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.devices.len(), 6);
    assert!(first.devices.iter().all(|d| d.health == "Healthy"));
    assert!(tokio::time::timeout(Duration::from_millis(300), stream.next())
        .await
        .is_err());
    drop(stream);

    let resp = client
        .allocate(AllocateRequest {
            container_requests: vec![ContainerAllocateRequest {
                devices_ids: vec!["3".to_string()],
            }],
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.container_responses.len(), 1);
    assert_eq!(
        resp.container_responses[0].envs.get("OPENSHIFT_MUTUAL_CPUS").map(String::as_str),
        Some("4-9")
    );

    let status = client
        .pre_start_container(PreStartContainerRequest::default())
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);
    drop(client);

    // A kubelet restart wipes the socket; the plugin must come back and register again
    std::fs::remove_file(&socket).unwrap();
    wait_for_registrations(&kubelet, 2).await;
    wait_for_socket(&socket, TIMEOUT).await.unwrap();

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(TIMEOUT, handle).await.unwrap().unwrap();
    assert!(!socket.exists());
}
