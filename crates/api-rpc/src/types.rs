//! RPC Request Types
//!
//! Defines the JSON-RPC method parameters. Results are the core read models
//! (`ImmediateResponse`, `Accepted`, `JobView`, ...) serialized as-is.

use hyper::http::Extensions;
use serde::Deserialize;
use std::net::SocketAddr;
use workgate_core::domain::{Complexity, Operation, WorkPayload};
use workgate_core::error::Result;
use workgate_core::port::JobFilter;

/// Caller identity when the transport did not report a peer
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// Remote address of the connection a call arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

/// Rate-limit key for a call: the peer IP, never anything the caller sends
pub fn client_id(ext: &Extensions) -> String {
    ext.get::<PeerAddr>()
        .map(|peer| peer.0.ip().to_string())
        .unwrap_or_else(|| ANONYMOUS_CLIENT.to_string())
}

fn default_data() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Work description shared by both compute methods
#[derive(Debug, Clone, Deserialize)]
pub struct WorkParams {
    pub operation: String,
    pub complexity: i64,
    #[serde(default = "default_data")]
    pub data: serde_json::Value,
}

impl WorkParams {
    /// Unknown operations and out-of-range complexity are validation errors
    pub fn into_payload(self) -> Result<WorkPayload> {
        let operation: Operation = self.operation.parse()?;
        let complexity = Complexity::new(self.complexity)?;
        Ok(WorkPayload::new(operation, complexity, self.data))
    }
}

/// compute.sync.v1 - Run work inline
#[derive(Debug, Deserialize)]
pub struct ComputeSyncRequest {
    #[serde(flatten)]
    pub work: WorkParams,
}

/// compute.async.v1 - Queue work and deliver the outcome to `callback_url`
#[derive(Debug, Deserialize)]
pub struct ComputeAsyncRequest {
    #[serde(flatten)]
    pub work: WorkParams,
    pub callback_url: String,
}

/// requests.get.v1 - One request by id
#[derive(Debug, Deserialize)]
pub struct GetRequest {
    pub request_id: String,
}

/// requests.list.v1 - Page through requests, newest first
#[derive(Debug, Default, Deserialize)]
pub struct ListRequest {
    pub mode: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListRequest {
    pub fn into_filter(self) -> Result<JobFilter> {
        let defaults = JobFilter::default();
        Ok(JobFilter {
            mode: self.mode.as_deref().map(str::parse).transpose()?,
            state: self.status.as_deref().map(str::parse).transpose()?,
            limit: self.limit.unwrap_or(defaults.limit),
            offset: self.offset.unwrap_or(defaults.offset),
        }
        .normalized())
    }
}
