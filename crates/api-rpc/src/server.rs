//! JSON-RPC Server
//!
//! JSON-RPC 2.0 over HTTP. Binds to localhost unless configured otherwise.
//! Connections are accepted here rather than by jsonrpsee so each request
//! can carry its peer address down to the methods.

use crate::handler::RpcHandler;
use crate::types::{
    client_id, ComputeAsyncRequest, ComputeSyncRequest, GetRequest, ListRequest, PeerAddr,
};
use jsonrpsee::server::{
    serve_with_graceful_shutdown, stop_channel, Methods, Server, ServerHandle, StopHandle,
};
use jsonrpsee::RpcModule;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::Service;
use tracing::{debug, info, warn};
use workgate_core::application::ComputeService;
use workgate_core::error::{AppError, Result};

pub const DEFAULT_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 9630;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

fn register_err(e: impl std::fmt::Display) -> AppError {
    AppError::Internal(format!("Failed to register RPC method: {}", e))
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, service: Arc<ComputeService>) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(service)),
        }
    }

    fn build_module(&self) -> Result<RpcModule<()>> {
        let mut module = RpcModule::new(());

        let handler = self.handler.clone();
        module
            .register_async_method("compute.sync.v1", move |params, _, ext| {
                let handler = handler.clone();
                async move {
                    let req: ComputeSyncRequest = params.parse()?;
                    handler.compute_sync(&client_id(&ext), req).await
                }
            })
            .map_err(register_err)?;

        let handler = self.handler.clone();
        module
            .register_async_method("compute.async.v1", move |params, _, ext| {
                let handler = handler.clone();
                async move {
                    let req: ComputeAsyncRequest = params.parse()?;
                    handler.compute_async(&client_id(&ext), req).await
                }
            })
            .map_err(register_err)?;

        let handler = self.handler.clone();
        module
            .register_async_method("requests.get.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: GetRequest = params.parse()?;
                    handler.get(req).await
                }
            })
            .map_err(register_err)?;

        let handler = self.handler.clone();
        module
            .register_async_method("requests.list.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    // All list parameters are optional
                    let req: ListRequest = match params.as_str() {
                        Some(_) => params.parse()?,
                        None => ListRequest::default(),
                    };
                    handler.list(req).await
                }
            })
            .map_err(register_err)?;

        // Admin APIs
        let handler = self.handler.clone();
        module
            .register_async_method("admin.metrics.v1", move |_, _, _| {
                let handler = handler.clone();
                async move { handler.metrics().await }
            })
            .map_err(register_err)?;

        let handler = self.handler.clone();
        module
            .register_async_method("admin.health.v1", move |_, _, _| {
                let handler = handler.clone();
                async move { handler.health().await }
            })
            .map_err(register_err)?;

        Ok(module)
    }

    /// Start the JSON-RPC server; returns the bound address and a stop handle
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AppError::Internal(format!("Failed to read bound address: {}", e)))?;

        let methods: Methods = self.build_module()?.into();
        let (stop_handle, server_handle) = stop_channel();
        tokio::spawn(accept_loop(listener, methods, stop_handle));

        info!(addr = %local_addr, "JSON-RPC server started");
        Ok((local_addr, server_handle))
    }
}

async fn accept_loop(listener: TcpListener, methods: Methods, stop_handle: StopHandle) {
    let svc_builder = Server::builder().to_service_builder();
    loop {
        let (sock, remote) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
            _ = stop_handle.clone().shutdown() => break,
        };
        debug!(peer = %remote, "Connection accepted");

        let svc_builder = svc_builder.clone();
        let methods = methods.clone();
        let conn_stop = stop_handle.clone();
        let svc = tower::service_fn(move |mut req: hyper::Request<hyper::body::Incoming>| {
            req.extensions_mut().insert(PeerAddr(remote));
            let mut rpc = svc_builder
                .clone()
                .build(methods.clone(), conn_stop.clone());
            async move { rpc.call(req).await }
        });

        tokio::spawn(serve_with_graceful_shutdown(
            sock,
            svc,
            stop_handle.clone().shutdown(),
        ));
    }
    info!("JSON-RPC server stopped accepting connections");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use jsonrpsee::core::client::ClientT;
    use jsonrpsee::core::ClientError;
    use jsonrpsee::core::params::ObjectParams;
    use jsonrpsee::http_client::HttpClientBuilder;
    use jsonrpsee::rpc_params;
    use serde_json::Value;
    use workgate_core::application::{ComputeRuntime, RuntimeConfig, RuntimeDeps};
    use workgate_core::port::callback_transport::mocks::MockCallbackTransport;
    use workgate_core::port::host_resolver::mocks::StaticResolver;
    use workgate_core::port::job_repository::mocks::InMemoryJobRepository;
    use workgate_core::port::work_engine::mocks::MockWorkEngine;
    use workgate_core::port::{SystemTimeProvider, UuidProvider};

    async fn start_server(config: RuntimeConfig) -> (ComputeRuntime, SocketAddr, ServerHandle) {
        let runtime = ComputeRuntime::start(
            config,
            RuntimeDeps {
                job_repo: Arc::new(InMemoryJobRepository::new()),
                engine: Arc::new(MockWorkEngine::new_success()),
                transport: Arc::new(MockCallbackTransport::always_ok()),
                resolver: Arc::new(StaticResolver::new()),
                id_provider: Arc::new(UuidProvider),
                time_provider: Arc::new(SystemTimeProvider),
            },
        )
        .unwrap();
        let config = RpcServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        };
        let (addr, handle) = RpcServer::new(config, runtime.service())
            .start()
            .await
            .unwrap();
        (runtime, addr, handle)
    }

    #[tokio::test]
    async fn test_round_trip_over_http() {
        let (_runtime, addr, handle) = start_server(RuntimeConfig::default()).await;
        let client = HttpClientBuilder::default()
            .build(format!("http://{}", addr))
            .unwrap();

        let mut params = ObjectParams::new();
        params.insert("operation", "hash").unwrap();
        params.insert("complexity", 1).unwrap();
        let response: Value = client.request("compute.sync.v1", params).await.unwrap();
        assert_eq!(response["status"], "succeeded");

        let mut params = ObjectParams::new();
        params
            .insert("request_id", response["request_id"].as_str().unwrap())
            .unwrap();
        let view: Value = client.request("requests.get.v1", params).await.unwrap();
        assert_eq!(view["mode"], "immediate");

        let page: Value = client.request("requests.list.v1", rpc_params![]).await.unwrap();
        assert_eq!(page["total"], 1);

        let health: Value = client.request("admin.health.v1", rpc_params![]).await.unwrap();
        assert_eq!(health["status"], "healthy");

        let metrics: Value = client.request("admin.metrics.v1", rpc_params![]).await.unwrap();
        assert_eq!(metrics["queue"]["max_size"], 100);

        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn test_error_codes_over_http() {
        let (_runtime, addr, handle) = start_server(RuntimeConfig::default()).await;
        let client = HttpClientBuilder::default()
            .build(format!("http://{}", addr))
            .unwrap();

        let mut params = ObjectParams::new();
        params.insert("request_id", "missing").unwrap();
        let err = client
            .request::<Value, _>("requests.get.v1", params)
            .await
            .unwrap_err();
        match err {
            ClientError::Call(obj) => assert_eq!(obj.code(), code::NOT_FOUND),
            other => panic!("unexpected error: {:?}", other),
        }

        let mut params = ObjectParams::new();
        params.insert("operation", "hash").unwrap();
        params.insert("complexity", 1).unwrap();
        params
            .insert("callback_url", "http://127.0.0.1:8080/cb")
            .unwrap();
        let err = client
            .request::<Value, _>("compute.async.v1", params)
            .await
            .unwrap_err();
        match err {
            ClientError::Call(obj) => assert_eq!(obj.code(), code::VALIDATION_ERROR),
            other => panic!("unexpected error: {:?}", other),
        }

        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn test_rate_limit_keys_on_peer_address() {
        let (_runtime, addr, handle) = start_server(RuntimeConfig {
            rate_limit_requests: 1,
            ..RuntimeConfig::default()
        })
        .await;
        let url = format!("http://{}", addr);

        let call = |claimed: &str| {
            let mut params = ObjectParams::new();
            params.insert("operation", "hash").unwrap();
            params.insert("complexity", 1).unwrap();
            // Ignored: callers cannot choose their own bucket
            params.insert("client_id", claimed).unwrap();
            params
        };

        let first = HttpClientBuilder::default().build(&url).unwrap();
        let _: Value = first.request("compute.sync.v1", call("tenant-a")).await.unwrap();

        // A fresh connection from the same host draws from the same bucket
        let second = HttpClientBuilder::default().build(&url).unwrap();
        let err = second
            .request::<Value, _>("compute.sync.v1", call("tenant-b"))
            .await
            .unwrap_err();
        match err {
            ClientError::Call(obj) => assert_eq!(obj.code(), code::RATE_LIMITED),
            other => panic!("unexpected error: {:?}", other),
        }

        let metrics: Value = second.request("admin.metrics.v1", rpc_params![]).await.unwrap();
        assert_eq!(metrics["rate_limited_clients"], 1);

        handle.stop().unwrap();
    }
}
