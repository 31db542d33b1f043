//! gRPC front of the coordinator for the container runtime
//!
//! Every request gets a trace id so that the log lines of one lifecycle
//! event can be correlated, and is timed and counted in Prometheus.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tonic::{Request, Response, Status};
use tracing::{debug, info_span, warn};
use uuid::Uuid;

use super::{Coordinator, CoordinatorError};
use crate::grpc::lifecycle_api::plugin_server::Plugin;
use crate::grpc::lifecycle_api::{
    CreateContainerRequest, CreateContainerResponse, UpdateContainerRequest,
    UpdateContainerResponse,
};
use crate::metrics::{CONTAINER_ADJUSTMENTS_TOTAL, LIFECYCLE_REQUEST_DURATION};

/// Serves CreateContainer/UpdateContainer on behalf of a [`Coordinator`]
pub struct LifecycleService {
    coordinator: Arc<Coordinator>,
}

impl LifecycleService {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

#[tonic::async_trait]
impl Plugin for LifecycleService {
    async fn create_container(
        &self,
        request: Request<CreateContainerRequest>,
    ) -> Result<Response<CreateContainerResponse>, Status> {
        let start = Instant::now();
        let req = request.into_inner();
        let (Some(pod), Some(ctr)) = (req.pod, req.container) else {
            return Err(Status::invalid_argument("pod and container are required"));
        };

        let trace_id = Uuid::now_v7().to_string();
        let span = info_span!("create_container", %trace_id, container_id = %ctr.id);
        let result = span.in_scope(|| {
            let result = self.coordinator.create_container(&pod, &ctr);
            if let Ok((adjust, _)) = &result {
                log_json("sending adjustment to runtime", adjust);
            }
            result
        });

        let outcome = match &result {
            Ok((adjust, _)) if adjust.linux.is_some() => "adjusted",
            Ok(_) => "skipped",
            Err(_) => "error",
        };
        record("create", outcome, start);

        let (adjust, update) = result.map_err(|e| reject(&trace_id, e))?;
        Ok(Response::new(CreateContainerResponse {
            adjust: Some(adjust),
            update,
        }))
    }

    async fn update_container(
        &self,
        request: Request<UpdateContainerRequest>,
    ) -> Result<Response<UpdateContainerResponse>, Status> {
        let start = Instant::now();
        let req = request.into_inner();
        let (Some(pod), Some(mut ctr)) = (req.pod, req.container) else {
            return Err(Status::invalid_argument("pod and container are required"));
        };

        // The resources the update carries replace the container's current ones
        if let Some(resources) = req.linux_resources {
            ctr.linux.get_or_insert_with(Default::default).resources = Some(resources);
        }

        let trace_id = Uuid::now_v7().to_string();
        let span = info_span!("update_container", %trace_id, container_id = %ctr.id);
        let result = span.in_scope(|| {
            let result = self.coordinator.update_container(&pod, &ctr);
            if let Ok(update) = &result {
                log_json("sending update to runtime", update);
            }
            result
        });

        let outcome = match &result {
            Ok(update) if !update.is_empty() => "adjusted",
            Ok(_) => "skipped",
            Err(_) => "error",
        };
        record("update", outcome, start);

        let update = result.map_err(|e| reject(&trace_id, e))?;
        Ok(Response::new(UpdateContainerResponse { update }))
    }
}

fn record(operation: &str, outcome: &str, start: Instant) {
    CONTAINER_ADJUSTMENTS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
    LIFECYCLE_REQUEST_DURATION
        .with_label_values(&[operation])
        .observe(start.elapsed().as_secs_f64());
}

fn reject(trace_id: &str, e: CoordinatorError) -> Status {
    warn!(%trace_id, error = %e, "rejecting container adjustment");
    e.into()
}

fn log_json<T: Serialize>(message: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => debug!(payload = %json, "{}", message),
        Err(e) => debug!(error = %e, "{}", message),
    }
}
