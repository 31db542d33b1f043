//! Serving and kubelet registration loop
//!
//! ```text
//!   ┌──► bind <dir>/openshift.io_mutualcpu.sock ──► serve
//!   │            │
//!   │            ▼
//!   │    Register on <dir>/kubelet.sock
//!   │            │
//!   │            ▼
//!   │    poll socket ──exists──► keep serving
//!   │            │removed (kubelet restarted)
//!   └────────────┘
//! ```
//!
//! A kubelet restart wipes the device plugin directory, so the socket
//! vanishing is the signal to start over and register again.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::{error, info, warn};

use super::{
    endpoint_name, plugin_options, DevicePluginError, MutualCpuPlugin, API_VERSION,
    KUBELET_SOCKET,
};
use crate::grpc::deviceplugin_api::device_plugin_server::DevicePluginServer;
use crate::grpc::deviceplugin_api::registration_client::RegistrationClient;
use crate::grpc::deviceplugin_api::RegisterRequest;
use crate::grpc::{bind_unix_listener, connect_unix, wait_for_socket};
use crate::metrics::REGISTRATIONS_TOTAL;

const SOCKET_READY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
/// ListAndWatch streams never end on their own, so draining is bounded
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Why one serving round ended
enum Exit {
    Shutdown,
    Restart,
}

/// Keeps the plugin served and registered for the lifetime of the daemon
pub struct DevicePluginManager {
    plugin: MutualCpuPlugin,
    dir: PathBuf,
    poll_interval: Duration,
    retry_delay: Duration,
}

impl DevicePluginManager {
    pub fn new(plugin: MutualCpuPlugin, dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin,
            dir: dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override how often the socket is checked and how long to wait after a failure
    pub fn with_intervals(mut self, poll_interval: Duration, retry_delay: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.retry_delay = retry_delay;
        self
    }

    pub fn socket_path(&self) -> PathBuf {
        self.dir.join(endpoint_name())
    }

    pub fn kubelet_socket_path(&self) -> PathBuf {
        self.dir.join(KUBELET_SOCKET)
    }

    /// Serve and re-register until `shutdown` flips to true
    ///
    /// Failures are logged and retried; this only returns on shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            resource = self.plugin.resource_name(),
            devices = self.plugin.device_count(),
            dir = %self.dir.display(),
            "starting device plugin"
        );

        while !*shutdown.borrow() {
            match self.serve_once(&mut shutdown).await {
                Ok(Exit::Shutdown) => break,
                Ok(Exit::Restart) => info!(
                    socket = %self.socket_path().display(),
                    "plugin socket removed, restarting"
                ),
                Err(e) => {
                    warn!(error = %e, retry_in = ?self.retry_delay, "device plugin failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        let _ = std::fs::remove_file(self.socket_path());
        info!("device plugin stopped");
    }

    async fn serve_once(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Exit, DevicePluginError> {
        let socket = self.socket_path();
        let listener = bind_unix_listener(&socket).map_err(|source| DevicePluginError::Io {
            path: socket.clone(),
            source,
        })?;

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = Server::builder()
            .add_service(DevicePluginServer::new(self.plugin.clone()))
            .serve_with_incoming_shutdown(UnixListenerStream::new(listener), async move {
                let _ = stop_rx.await;
            });
        tokio::pin!(server);

        let supervise = self.supervise(&socket);
        tokio::pin!(supervise);

        let outcome = tokio::select! {
            res = server.as_mut() => return res.map(|()| Exit::Restart).map_err(Into::into),
            res = supervise.as_mut() => res,
            _ = shutdown.changed() => Ok(Exit::Shutdown),
        };

        let _ = stop_tx.send(());
        match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
            Ok(res) => res?,
            Err(_) => warn!("device plugin server did not drain in time, dropping open streams"),
        }
        outcome
    }

    /// Register once the socket is up, then wait for it to disappear
    async fn supervise(&self, socket: &Path) -> Result<Exit, DevicePluginError> {
        wait_for_socket(socket, SOCKET_READY_TIMEOUT)
            .await
            .map_err(|source| DevicePluginError::Io {
                path: socket.to_path_buf(),
                source,
            })?;

        register(
            &self.kubelet_socket_path(),
            &endpoint_name(),
            self.plugin.resource_name(),
        )
        .await?;

        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if !socket.exists() {
                return Ok(Exit::Restart);
            }
        }
    }
}

/// Announce the plugin endpoint and its resource to the kubelet
pub async fn register(
    kubelet_socket: &Path,
    endpoint: &str,
    resource_name: &str,
) -> Result<(), DevicePluginError> {
    let result = async {
        let channel = connect_unix(kubelet_socket).await?;
        let mut client = RegistrationClient::new(channel);
        client
            .register(RegisterRequest {
                version: API_VERSION.to_string(),
                endpoint: endpoint.to_string(),
                resource_name: resource_name.to_string(),
                options: Some(plugin_options()),
            })
            .await?;
        Ok::<_, DevicePluginError>(())
    }
    .await;

    match &result {
        Ok(()) => {
            REGISTRATIONS_TOTAL.with_label_values(&["ok"]).inc();
            info!(endpoint, resource = resource_name, "registered with kubelet");
        }
        Err(e) => {
            REGISTRATIONS_TOTAL.with_label_values(&["error"]).inc();
            error!(error = %e, kubelet = %kubelet_socket.display(), "registration failed");
        }
    }
    result
}
