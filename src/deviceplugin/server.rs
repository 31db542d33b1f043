//! DevicePlugin gRPC service for the mutual CPU resource

use std::collections::HashMap;

use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use super::{plugin_options, HEALTHY, MUTUAL_CPUS_ENV, MUTUAL_CPU_DEVICE_NAME};
use crate::cpuset::Cpuset;
use crate::grpc::deviceplugin_api::device_plugin_server::DevicePlugin;
use crate::grpc::deviceplugin_api::{
    AllocateRequest, AllocateResponse, ContainerAllocateResponse, Device, DevicePluginOptions,
    Empty, ListAndWatchResponse, PreStartContainerRequest, PreStartContainerResponse,
    PreferredAllocationRequest, PreferredAllocationResponse,
};
use crate::metrics::{ALLOCATIONS_TOTAL, LIST_AND_WATCH_STREAMS};

/// Advertises the mutual pool as a countable resource
///
/// The device ids carry no meaning: any allocation, whatever ids the
/// kubelet picked, is answered with the whole mutual pool.
#[derive(Debug, Clone)]
pub struct MutualCpuPlugin {
    mutual: Cpuset,
    device_count: usize,
}

impl MutualCpuPlugin {
    /// `device_count` defaults to the size of the mutual pool
    pub fn new(mutual: Cpuset, device_count: Option<usize>) -> Self {
        let device_count = device_count.unwrap_or_else(|| mutual.size());
        Self {
            mutual,
            device_count,
        }
    }

    /// Fully qualified resource announced to the kubelet
    pub fn resource_name(&self) -> &'static str {
        MUTUAL_CPU_DEVICE_NAME
    }

    pub fn device_count(&self) -> usize {
        self.device_count
    }

    /// Devices "0".."n-1", all healthy, without topology
    pub fn devices(&self) -> Vec<Device> {
        (0..self.device_count)
            .map(|i| Device {
                id: i.to_string(),
                health: HEALTHY.to_string(),
                topology: None,
            })
            .collect()
    }

    fn container_response(&self) -> ContainerAllocateResponse {
        ContainerAllocateResponse {
            envs: HashMap::from([(MUTUAL_CPUS_ENV.to_string(), self.mutual.to_string())]),
            ..Default::default()
        }
    }
}

#[tonic::async_trait]
impl DevicePlugin for MutualCpuPlugin {
    type ListAndWatchStream = ReceiverStream<Result<ListAndWatchResponse, Status>>;

    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<DevicePluginOptions>, Status> {
        Ok(Response::new(plugin_options()))
    }

    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListAndWatchStream>, Status> {
        let devices = self.devices();
        info!(devices = devices.len(), "ListAndWatch: advertising mutual cpu devices");

        let (tx, rx) = tokio::sync::mpsc::channel(1);
        LIST_AND_WATCH_STREAMS.inc();

        tokio::spawn(async move {
            if tx.send(Ok(ListAndWatchResponse { devices })).await.is_ok() {
                // The pool never changes; hold the stream until the kubelet drops it
                tx.closed().await;
            }
            debug!("ListAndWatch stream closed");
            LIST_AND_WATCH_STREAMS.dec();
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn get_preferred_allocation(
        &self,
        _request: Request<PreferredAllocationRequest>,
    ) -> Result<Response<PreferredAllocationResponse>, Status> {
        Err(Status::unimplemented(
            "method GetPreferredAllocation not implemented",
        ))
    }

    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> Result<Response<AllocateResponse>, Status> {
        let req = request.into_inner();
        let trace_id = Uuid::now_v7().to_string();
        let _span = info_span!("allocate", %trace_id).entered();

        if req.container_requests.is_empty() {
            ALLOCATIONS_TOTAL.with_label_values(&["error"]).inc();
            warn!("allocate request without container requests");
            return Err(Status::invalid_argument("no container requests"));
        }

        let container_responses: Vec<_> = req
            .container_requests
            .iter()
            .map(|c| {
                debug!(devices = ?c.devices_ids, "allocating mutual cpus");
                self.container_response()
            })
            .collect();

        ALLOCATIONS_TOTAL
            .with_label_values(&["ok"])
            .inc_by(container_responses.len() as f64);
        info!(
            containers = container_responses.len(),
            mutual_cpus = %self.mutual,
            "allocated mutual cpus"
        );

        Ok(Response::new(AllocateResponse {
            container_responses,
        }))
    }

    async fn pre_start_container(
        &self,
        _request: Request<PreStartContainerRequest>,
    ) -> Result<Response<PreStartContainerResponse>, Status> {
        Err(Status::unimplemented("method PreStartContainer not implemented"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::deviceplugin_api::ContainerAllocateRequest;
    use tokio_stream::StreamExt;

    fn plugin() -> MutualCpuPlugin {
        MutualCpuPlugin::new(Cpuset::parse("4-9").unwrap(), None)
    }

    #[test]
    fn test_resource_name_is_qualified() {
        assert_eq!(plugin().resource_name(), "openshift.io/mutualcpu");
    }

    #[test]
    fn test_device_count_defaults_to_pool_size() {
        let devices = plugin().devices();
        assert_eq!(devices.len(), 6);
        assert_eq!(devices[0].id, "0");
        assert_eq!(devices[5].id, "5");
        assert!(devices.iter().all(|d| d.health == "Healthy" && d.topology.is_none()));

        let fixed = MutualCpuPlugin::new(Cpuset::parse("4-9").unwrap(), Some(99));
        assert_eq!(fixed.devices().len(), 99);
    }

    #[tokio::test]
    async fn test_allocate_one_response_per_container() {
        let request = AllocateRequest {
            container_requests: vec![
                ContainerAllocateRequest {
                    devices_ids: vec!["0".to_string()],
                },
                ContainerAllocateRequest {
                    devices_ids: vec!["1".to_string(), "2".to_string()],
                },
            ],
        };
        let resp = plugin()
            .allocate(Request::new(request))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(resp.container_responses.len(), 2);
        for c in &resp.container_responses {
            assert_eq!(c.envs.len(), 1);
            assert_eq!(c.envs.get("OPENSHIFT_MUTUAL_CPUS").map(String::as_str), Some("4-9"));
            assert!(c.mounts.is_empty() && c.devices.is_empty());
        }
    }

    #[tokio::test]
    async fn test_allocate_rejects_empty_request() {
        let status = plugin()
            .allocate(Request::new(AllocateRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_unsupported_methods() {
        let p = plugin();
        let status = p
            .get_preferred_allocation(Request::new(PreferredAllocationRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unimplemented);

        let status = p
            .pre_start_container(Request::new(PreStartContainerRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
    }

    #[tokio::test]
    async fn test_list_and_watch_sends_once() {
        let mut stream = plugin()
            .list_and_watch(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.devices.len(), 6);

        let next =
            tokio::time::timeout(std::time::Duration::from_millis(200), stream.next()).await;
        assert!(next.is_err(), "stream must stay open without sending again");
    }
}
