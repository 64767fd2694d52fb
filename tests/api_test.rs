mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use common::{instance, UNREACHABLE};
use payment_router::{controller, store::SharedStateStore, structs::PaymentTask};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_post_payment_enqueues_task() {
    let node = instance(UNREACHABLE.into(), UNREACHABLE.into());
    let app = controller::app(node.app_state());

    let (status, _) = send(
        app,
        post_json(
            "/payments",
            json!({"correlationId": "4a7901b8-7d26-4d9d-aa19-4dc1c7cf60b3", "amount": 19.90}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let queued = node.queue.pop_batch(10).await.unwrap();
    assert_eq!(
        queued,
        vec![PaymentTask::new("4a7901b8-7d26-4d9d-aa19-4dc1c7cf60b3", dec!(19.90))]
    );
}

#[tokio::test]
async fn test_post_payment_rejects_incomplete_bodies() {
    let node = instance(UNREACHABLE.into(), UNREACHABLE.into());

    for body in [
        json!({"amount": 10}),
        json!({"correlationId": "abc"}),
        json!({"correlationId": "abc", "amount": 0}),
        json!({"correlationId": "", "amount": 10}),
    ] {
        let (status, _) = send(controller::app(node.app_state()), post_json("/payments", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    let garbage = Request::post("/payments")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(controller::app(node.app_state()), garbage).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(node.queue.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_summary_out_of_range_is_zeroed() {
    let node = instance(UNREACHABLE.into(), UNREACHABLE.into());
    let app = controller::app(node.app_state());

    let request = Request::get("/payments-summary?from=2024-01-01&to=2024-01-02")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);

    let summary: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        summary,
        json!({
            "default": {"totalRequests": 0, "totalAmount": 0.0},
            "fallback": {"totalRequests": 0, "totalAmount": 0.0},
        })
    );
}

#[tokio::test]
async fn test_summary_rejects_unparseable_bounds() {
    let node = instance(UNREACHABLE.into(), UNREACHABLE.into());
    let request = Request::get("/payments-summary?from=last-week")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(controller::app(node.app_state()), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_purge_clears_records_and_queue() {
    let node = instance(UNREACHABLE.into(), UNREACHABLE.into());
    node.queue.push(&PaymentTask::new("queued", dec!(1))).await.unwrap();
    node.store
        .hset_multiple(
            "payment:done",
            &[
                ("amount", "5.00".to_string()),
                ("requestedAt", "2025-07-01T10:00:00.000Z".to_string()),
                ("processor", "default".to_string()),
            ],
        )
        .await
        .unwrap();
    node.store.sadd("payments", "done").await.unwrap();

    let (status, body) = send(
        controller::app(node.app_state()),
        Request::post("/purge-payments").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let message: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(message["message"], "Purged 1 payments");

    assert_eq!(node.queue.len().await.unwrap(), 0);
    assert!(node.store.hget_all("payment:done").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_health_endpoint_ignores_processor_state() {
    let node = instance(UNREACHABLE.into(), UNREACHABLE.into());
    let (status, body) = send(
        controller::app(node.app_state()),
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"ping": "pong"}));
}

#[tokio::test]
async fn test_store_outage_is_a_server_error() {
    let node = instance(UNREACHABLE.into(), UNREACHABLE.into());
    node.store.set_unavailable(true);

    let (status, _) = send(
        controller::app(node.app_state()),
        post_json("/payments", json!({"correlationId": "abc", "amount": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}
