mod common;

use common::fast_delivery_config;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use runbook_agent::runbook::{
    ActionResultPayload, DeliveryError, HttpResultSender, ResultDelivery, ResultSender,
};

const RESULT_PATH: &str = "/jsm/ops/jec/v1/callback";

fn sender(server: &MockServer) -> HttpResultSender {
    HttpResultSender::new(&server.uri(), "secret", Duration::from_secs(2)).unwrap()
}

fn payload() -> ActionResultPayload {
    ActionResultPayload {
        request_id: "RequestId".to_string(),
        action: "Create".to_string(),
        is_successful: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_result_is_posted_with_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RESULT_PATH))
        .and(header("Authorization", "GenieKey secret"))
        .and(header("Content-Type", "application/json; charset=UTF-8"))
        .and(body_json(json!({
            "requestId": "RequestId",
            "action": "Create",
            "isSuccessful": true
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    sender(&server).send(&payload()).await.unwrap();
}

#[tokio::test]
async fn test_non_accepted_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RESULT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok but not accepted"))
        .mount(&server)
        .await;

    let error = sender(&server).send(&payload()).await.unwrap_err();
    match &error {
        DeliveryError::UnexpectedStatus { status, body } => {
            assert_eq!(*status, 200);
            assert_eq!(body, "ok but not accepted");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RESULT_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(RESULT_PATH))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let delivery = ResultDelivery::start(Arc::new(sender(&server)), fast_delivery_config());
    assert!(delivery.enqueue("m-1", payload()));
    delivery.shutdown().await;

    let stats = delivery.stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RESULT_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let delivery = ResultDelivery::start(Arc::new(sender(&server)), fast_delivery_config());
    delivery.enqueue("m-1", payload());
    delivery.shutdown().await;

    let stats = delivery.stats();
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.failed, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_enqueue_after_shutdown_is_dropped() {
    let server = MockServer::start().await;
    let delivery = ResultDelivery::start(Arc::new(sender(&server)), fast_delivery_config());
    delivery.shutdown().await;

    assert!(!delivery.enqueue("m-1", payload()));
    assert_eq!(delivery.stats().dropped, 1);
}
