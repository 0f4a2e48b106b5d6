//! Standalone regression tests.
//!
//! Drives the REST API the daemon serves, with and without the controllers
//! running behind it.

use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use replikit_api::build_router;
use replikit_controller::{Client, Manager, ManagerConfig, enabled_controllers, enabled_webhooks};
use replikit_state::*;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn test_client() -> Client {
    Client::new(StateStore::open_in_memory().unwrap()).with_webhooks(enabled_webhooks())
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn standalone_api_list_fleets_empty() {
    let router = build_router(test_client());

    let (status, body) = send(&router, "GET", "/api/v1/namespaces/default/fleets", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], serde_json::json!([]));
}

#[tokio::test]
async fn standalone_api_create_get_and_scale_fleet() {
    let router = build_router(test_client());

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/namespaces/default/fleets",
        Some(serde_json::json!({ "name": "web", "desired_replicas": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["metadata"]["resource_version"], 1);

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/namespaces/default/fleets/web/scale",
        Some(serde_json::json!({ "desired_replicas": 4 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["spec"]["desired_replicas"], 4);

    let (status, body) = send(&router, "GET", "/api/v1/namespaces/default/fleets/web", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["metadata"]["generation"], 2);

    // Namespaces are isolated.
    let (status, _) = send(&router, "GET", "/api/v1/namespaces/other/fleets/web", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn standalone_api_rejects_dangling_replica() {
    let router = build_router(test_client());

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/namespaces/default/replicas",
        Some(serde_json::json!({ "fleet": "missing" })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("unexistent Fleet"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn standalone_controllers_reconcile_api_changes() {
    let client = test_client();
    let router = build_router(client.clone());

    let shutdown = CancellationToken::new();
    let manager_client = client.clone().with_cancellation(shutdown.clone());
    let manager = Manager::new(manager_client.clone(), ManagerConfig::default());
    let controllers = enabled_controllers(&manager_client);
    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { manager.run(controllers, shutdown).await })
    };

    let (status, _) = send(
        &router,
        "POST",
        "/api/v1/namespaces/default/fleets",
        Some(serde_json::json!({ "name": "web", "desired_replicas": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let (_, body) = send(&router, "GET", "/api/v1/namespaces/default/fleets/web", None).await;
        let healthy = body["data"]["status"]["conditions"][0]["reason"] == "Healthy"
            && body["data"]["status"]["replicas"].as_array().map(Vec::len) == Some(3);
        if healthy {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "fleet never became healthy");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (status, body) = send(
        &router,
        "GET",
        "/api/v1/namespaces/default/replicas?fleet=web",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let (status, _) = send(&router, "DELETE", "/api/v1/namespaces/default/fleets/web", None).await;
    assert_eq!(status, StatusCode::OK);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let (fleet_status, _) = send(&router, "GET", "/api/v1/namespaces/default/fleets/web", None).await;
        let (_, replicas) = send(&router, "GET", "/api/v1/namespaces/default/replicas", None).await;
        if fleet_status == StatusCode::NOT_FOUND && replicas["data"] == serde_json::json!([]) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "fleet was never finalized");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
