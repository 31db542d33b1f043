//! Kubelet device plugin advertising the mutual CPU pool
//!
//! The pool is exposed as the extended resource `openshift.io/mutualcpu`.
//! A pod requesting it gets `OPENSHIFT_MUTUAL_CPUS=<mutual cpus>` injected
//! into its containers, which the coordinator later takes as an opt-in.
//!
//! # Architecture
//!
//! ```text
//! kubelet ◄──Register── DevicePluginManager
//!    │                        │ serves
//!    │                        ▼
//!    └──ListAndWatch/Allocate──► MutualCpuPlugin
//!        (<dir>/openshift.io_mutualcpu.sock)
//! ```

pub mod manager;
pub mod server;

use std::fmt;
use std::io;
use std::path::PathBuf;

pub use manager::{register, DevicePluginManager};
pub use server::MutualCpuPlugin;

use crate::grpc::deviceplugin_api::DevicePluginOptions;

pub const MUTUAL_CPU_RESOURCE_NAMESPACE: &str = "openshift.io";
pub const MUTUAL_CPU_RESOURCE_NAME: &str = "mutualcpu";
/// Fully qualified resource name pods request
pub const MUTUAL_CPU_DEVICE_NAME: &str = "openshift.io/mutualcpu";
/// Variable handed to containers that were allocated the device
pub const MUTUAL_CPUS_ENV: &str = "OPENSHIFT_MUTUAL_CPUS";

pub const DEFAULT_DEVICE_PLUGIN_DIR: &str = "/var/lib/kubelet/device-plugins";
pub const KUBELET_SOCKET: &str = "kubelet.sock";
pub const API_VERSION: &str = "v1beta1";
pub const HEALTHY: &str = "Healthy";

/// Socket file name of the plugin, relative to the device plugin directory
pub fn endpoint_name() -> String {
    format!(
        "{}_{}.sock",
        MUTUAL_CPU_RESOURCE_NAMESPACE, MUTUAL_CPU_RESOURCE_NAME
    )
}

/// Options announced at registration and returned by GetDevicePluginOptions
pub fn plugin_options() -> DevicePluginOptions {
    DevicePluginOptions {
        pre_start_required: false,
        get_preferred_allocation_available: false,
    }
}

/// Error type for device plugin serving and registration
#[derive(Debug)]
pub enum DevicePluginError {
    /// Socket setup failed
    Io { path: PathBuf, source: io::Error },
    /// The gRPC server or client transport failed
    Transport(tonic::transport::Error),
    /// The kubelet rejected the registration
    Registration(tonic::Status),
}

impl fmt::Display for DevicePluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePluginError::Io { path, source } => {
                write!(f, "socket {}: {}", path.display(), source)
            }
            DevicePluginError::Transport(e) => write!(f, "gRPC transport error: {}", e),
            DevicePluginError::Registration(status) => write!(
                f,
                "kubelet registration failed: {} ({:?})",
                status.message(),
                status.code()
            ),
        }
    }
}

impl std::error::Error for DevicePluginError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DevicePluginError::Io { source, .. } => Some(source),
            DevicePluginError::Transport(e) => Some(e),
            DevicePluginError::Registration(status) => Some(status),
        }
    }
}

impl From<tonic::transport::Error> for DevicePluginError {
    fn from(e: tonic::transport::Error) -> Self {
        DevicePluginError::Transport(e)
    }
}

impl From<tonic::Status> for DevicePluginError {
    fn from(status: tonic::Status) -> Self {
        DevicePluginError::Registration(status)
    }
}
