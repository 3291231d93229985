//! RPC Method Handlers
//!
//! Parameter decoding and error mapping only; everything else is delegated
//! to `ComputeService`.

use crate::error::to_rpc_error;
use crate::types::{ComputeAsyncRequest, ComputeSyncRequest, GetRequest, ListRequest};
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use workgate_core::application::{
    Accepted, ComputeService, HealthReport, ImmediateResponse, JobListView, JobView,
    ServiceMetrics,
};

type RpcResult<T> = Result<T, ErrorObjectOwned>;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    service: Arc<ComputeService>,
}

impl RpcHandler {
    pub fn new(service: Arc<ComputeService>) -> Self {
        Self { service }
    }

    /// compute.sync.v1; `client` is the rate-limit key
    pub async fn compute_sync(
        &self,
        client: &str,
        params: ComputeSyncRequest,
    ) -> RpcResult<ImmediateResponse> {
        let payload = params.work.into_payload().map_err(to_rpc_error)?;
        self.service
            .submit_immediate(client, payload)
            .await
            .map_err(to_rpc_error)
    }

    /// compute.async.v1
    pub async fn compute_async(
        &self,
        client: &str,
        params: ComputeAsyncRequest,
    ) -> RpcResult<Accepted> {
        let payload = params.work.into_payload().map_err(to_rpc_error)?;
        self.service
            .submit_deferred(client, payload, &params.callback_url)
            .await
            .map_err(to_rpc_error)
    }

    /// requests.get.v1
    pub async fn get(&self, params: GetRequest) -> RpcResult<JobView> {
        self.service
            .get(&params.request_id)
            .await
            .map_err(to_rpc_error)
    }

    /// requests.list.v1
    pub async fn list(&self, params: ListRequest) -> RpcResult<JobListView> {
        let filter = params.into_filter().map_err(to_rpc_error)?;
        self.service.list(filter).await.map_err(to_rpc_error)
    }

    /// admin.metrics.v1
    pub async fn metrics(&self) -> RpcResult<ServiceMetrics> {
        self.service.metrics().await.map_err(to_rpc_error)
    }

    /// admin.health.v1
    pub async fn health(&self) -> RpcResult<HealthReport> {
        Ok(self.service.health().await)
    }
}
