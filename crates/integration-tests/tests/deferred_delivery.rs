//! Deferred mode end to end: SQLite store, real kernels, HTTP callbacks

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};
use workgate_core::application::RuntimeConfig;
use workgate_core::domain::{Complexity, JobState, Operation, WorkPayload};
use workgate_core::error::AdmissionRejected;
use workgate_core::port::work_engine::mocks::MockWorkEngine;
use workgate_core::port::{CallbackPayload, JobFilter};

use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hash_job_delivered_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/callback"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config();
    let repo = memory_repo().await;
    let runtime = start_runtime(config.clone(), repo, real_engine(), http_transport(&config));
    let service = runtime.service();

    let payload = WorkPayload::new(
        Operation::Hash,
        Complexity::new(1).unwrap(),
        json!({"input": "hello"}),
    );
    let accepted = service
        .submit_deferred("client-a", payload, &format!("{}/callback", server.uri()))
        .await
        .unwrap();
    assert_eq!(accepted.status, JobState::Queued);

    let view = wait_for_state(
        &service,
        &accepted.request_id,
        JobState::Delivered,
        Duration::from_secs(10),
    )
    .await;
    assert_eq!(view.delivery_attempts, 1);
    assert!(view.delivered_at.is_some());
    let result = view.result.clone().unwrap();
    assert_eq!(result["operation"], "hash");
    assert_eq!(result["iterations"], 200);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: CallbackPayload = requests[0].body_json().unwrap();
    assert_eq!(body.request_id, accepted.request_id);
    assert_eq!(body.status, "succeeded");
    assert_eq!(body.result, Some(result));

    let report = runtime.shutdown(Duration::from_secs(2)).await;
    assert!(report.drained);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failing_endpoint_ends_in_delivery_failed() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down for maintenance"))
        .mount(&server)
        .await;

    let config = test_config();
    let repo = memory_repo().await;
    let runtime = start_runtime(config.clone(), repo, real_engine(), http_transport(&config));
    let service = runtime.service();

    let accepted = service
        .submit_deferred(
            "client-a",
            WorkPayload::simple(Operation::Prime, Complexity::new(1).unwrap()),
            &server.uri(),
        )
        .await
        .unwrap();

    let view = wait_for_state(
        &service,
        &accepted.request_id,
        JobState::DeliveryFailed,
        Duration::from_secs(10),
    )
    .await;
    assert_eq!(view.delivery_attempts, config.max_callback_attempts);
    assert!(view.delivery_error.unwrap().contains("500"));
    // The computed result survives a failed delivery
    assert!(view.result.is_some());

    let posts = server.received_requests().await.unwrap();
    assert_eq!(posts.len(), config.max_callback_attempts as usize);

    runtime.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_queue_rejects_without_recording() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = RuntimeConfig {
        num_workers: 1,
        max_queue_size: 2,
        ..test_config()
    };
    let repo = memory_repo().await;
    let engine = Arc::new(MockWorkEngine::new_slow(Duration::from_millis(500)));
    let runtime = start_runtime(config.clone(), repo, engine, http_transport(&config));
    let service = runtime.service();

    let mut accepted = 0;
    let mut queue_full = 0;
    for _ in 0..6 {
        let result = service
            .submit_deferred(
                "client-a",
                WorkPayload::simple(Operation::Matrix, Complexity::new(1).unwrap()),
                &server.uri(),
            )
            .await;
        match result {
            Ok(_) => accepted += 1,
            Err(e) => {
                assert_eq!(
                    e.admission(),
                    Some(&AdmissionRejected::QueueFull { capacity: 2 })
                );
                queue_full += 1;
            }
        }
    }

    // One job may already sit with the single worker, two more fit in the queue
    assert!(accepted <= 3, "accepted {}", accepted);
    assert!(queue_full >= 3);

    let page = service.list(JobFilter::default()).await.unwrap();
    assert_eq!(page.total, accepted as i64, "rejected jobs must not be stored");

    let report = runtime.shutdown(Duration::from_secs(5)).await;
    assert!(report.drained);
}
