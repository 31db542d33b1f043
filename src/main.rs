//! mixed-cpu-node-plugin daemon
//!
//! Serves the runtime lifecycle API and the kubelet device plugin side by
//! side until SIGINT or SIGTERM.

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::{error, info};

use mixedcpus::cgroups::mode::MOUNTINFO_PATH;
use mixedcpus::cgroups::{CgroupResolver, QuotaPathResolver};
use mixedcpus::config::Config;
use mixedcpus::coordinator::{Coordinator, LifecycleService, ReservedPool};
use mixedcpus::deviceplugin::{DevicePluginManager, MutualCpuPlugin};
use mixedcpus::grpc::bind_unix_listener;
use mixedcpus::grpc::lifecycle_api::plugin_server::PluginServer;
use mixedcpus::metrics::{self, MUTUAL_CPUS};
use mixedcpus::tracing::{init_tracing, shutdown_tracing, SERVICE_NAME};

type BoxError = Box<dyn Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env()?;
    init_tracing(SERVICE_NAME, config.otlp_endpoint.as_deref(), config.log_json)?;

    let result = run(config).await;
    if let Err(e) = &result {
        error!(error = %e, "mixed-cpu node plugin failed");
    }
    shutdown_tracing();
    result
}

async fn run(config: Config) -> Result<(), BoxError> {
    let resolver = CgroupResolver::detect_at(
        &config.cgroup_root,
        Path::new(MOUNTINFO_PATH),
        &config.scope_prefix,
    )?;
    let pool = ReservedPool::new(&config.reserved_cpus, config.housekeeping_cpus)?;
    let mutual = pool.mutual_cpus();

    info!(
        node = %config.node_name,
        reserved_cpus = %pool.cpus(),
        housekeeping_cpus = %pool.housekeeping_cpus(),
        mutual_cpus = %mutual,
        cgroup_mode = %resolver.mode(),
        "mixed-cpu node plugin starting"
    );
    MUTUAL_CPUS.set(mutual.size() as f64);

    let coordinator = Arc::new(Coordinator::new(pool, resolver));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 1. Runtime lifecycle API
    let runtime_socket = config.runtime_socket_path();
    let listener = bind_unix_listener(&runtime_socket)?;
    info!(socket = %runtime_socket.display(), "serving runtime lifecycle API");

    let mut lifecycle_shutdown = shutdown_rx.clone();
    let mut lifecycle = tokio::spawn(
        Server::builder()
            .add_service(PluginServer::new(LifecycleService::new(coordinator)))
            .serve_with_incoming_shutdown(UnixListenerStream::new(listener), async move {
                let _ = lifecycle_shutdown.changed().await;
            }),
    );

    // 2. Kubelet device plugin
    let manager = DevicePluginManager::new(
        MutualCpuPlugin::new(mutual, config.device_count),
        &config.device_plugin_dir,
    );
    let device_plugin = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { manager.run(shutdown).await }
    });

    // 3. Metrics endpoint
    let metrics_server = config.metrics_addr.map(|addr| {
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr).await {
                error!(error = %e, %addr, "metrics endpoint failed");
            }
        })
    });

    tokio::select! {
        res = shutdown_signal() => res?,
        res = &mut lifecycle => {
            res??;
            return Err("runtime lifecycle server exited unexpectedly".into());
        }
    }

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    lifecycle.await??;
    device_plugin.await?;
    if let Some(handle) = metrics_server {
        handle.abort();
    }
    let _ = std::fs::remove_file(&runtime_socket);

    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = sigterm.recv() => {}
    }
    info!("received shutdown signal");
    Ok(())
}
