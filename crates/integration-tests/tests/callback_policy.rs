//! Callback target checks at admission time

mod common;

use std::net::IpAddr;
use std::sync::Arc;

use workgate_core::application::{ComputeRuntime, RuntimeConfig};
use workgate_core::domain::{Complexity, Operation, WorkPayload};
use workgate_core::error::AppError;
use workgate_core::port::callback_transport::mocks::MockCallbackTransport;
use workgate_core::port::host_resolver::mocks::StaticResolver;
use workgate_core::port::work_engine::mocks::MockWorkEngine;
use workgate_core::port::JobFilter;

use common::*;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

async fn runtime(config: RuntimeConfig) -> ComputeRuntime {
    let resolver = StaticResolver::new()
        .with_host("hooks.example.com", &[ip("93.184.216.34")])
        .with_host("internal.corp.example", &[ip("10.0.0.5")])
        .with_host("sneaky.example", &[ip("93.184.216.34"), ip("127.0.0.1")])
        .with_host("metadata.example", &[ip("169.254.169.254")]);
    start_runtime_with_resolver(
        config,
        memory_repo().await,
        Arc::new(MockWorkEngine::new_success()),
        Arc::new(MockCallbackTransport::always_ok()),
        Arc::new(resolver),
    )
}

fn payload() -> WorkPayload {
    WorkPayload::simple(Operation::Hash, Complexity::new(1).unwrap())
}

#[tokio::test]
async fn test_default_policy_blocks_internal_targets() {
    let runtime = runtime(RuntimeConfig::default()).await;
    let service = runtime.service();

    let blocked = [
        "http://127.0.0.1:8080/cb",
        "http://localhost/cb",
        "http://api.localhost/cb",
        "http://[::1]/cb",
        "http://0.0.0.0/cb",
        "http://10.1.2.3/cb",
        "http://192.168.1.10/cb",
        "http://169.254.169.254/latest/meta-data",
        "http://[fd00::1]/cb",
        "http://internal.corp.example/cb",
        "http://metadata.example/cb",
        // One bad address is enough
        "http://sneaky.example/cb",
        // Unresolvable
        "http://nowhere.example/cb",
        // Scheme and shape
        "ftp://hooks.example.com/cb",
        "file:///etc/passwd",
        "not a url",
    ];
    for url in blocked {
        let err = service
            .submit_deferred("client-a", payload(), url)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)), "{} -> {:?}", url, err);
    }

    let accepted = service
        .submit_deferred("client-a", payload(), "https://hooks.example.com/cb")
        .await
        .unwrap();

    // Only the accepted job was recorded
    let page = service.list(JobFilter::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].request_id, accepted.request_id);
}

#[tokio::test]
async fn test_flags_relax_each_class_independently() {
    let loopback_allowed = runtime(RuntimeConfig {
        block_localhost: false,
        ..RuntimeConfig::default()
    })
    .await;
    let service = loopback_allowed.service();
    assert!(service
        .submit_deferred("a", payload(), "http://127.0.0.1:9000/cb")
        .await
        .is_ok());
    assert!(service
        .submit_deferred("a", payload(), "http://10.0.0.8/cb")
        .await
        .is_err());

    let private_allowed = runtime(RuntimeConfig {
        block_private_ips: false,
        ..RuntimeConfig::default()
    })
    .await;
    let service = private_allowed.service();
    assert!(service
        .submit_deferred("a", payload(), "http://internal.corp.example/cb")
        .await
        .is_ok());
    assert!(service
        .submit_deferred("a", payload(), "http://localhost/cb")
        .await
        .is_err());

    let https_only = runtime(RuntimeConfig {
        allowed_callback_schemes: vec!["https".to_string()],
        ..RuntimeConfig::default()
    })
    .await;
    let service = https_only.service();
    assert!(service
        .submit_deferred("a", payload(), "http://hooks.example.com/cb")
        .await
        .is_err());
    assert!(service
        .submit_deferred("a", payload(), "https://hooks.example.com/cb")
        .await
        .is_ok());
}
