//! gRPC plumbing shared by the daemon's two servers
//!
//! This module provides:
//! - Generated bindings for the kubelet device-plugin API (`v1beta1`)
//! - Generated bindings for the runtime lifecycle API
//! - Unix-domain-socket listeners and client channels

pub mod uds;

/// Kubelet device-plugin API
pub mod deviceplugin_api {
    tonic::include_proto!("v1beta1");
}

/// Container lifecycle API consumed from the runtime
pub mod lifecycle_api {
    tonic::include_proto!("mixedcpus.lifecycle.v1");
}

pub use uds::{bind_unix_listener, connect_unix, wait_for_socket};
