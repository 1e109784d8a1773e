//! ApiClient against an in-process backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use livedrop_lib::api::ApiClient;
use livedrop_lib::config::AppConfig;
use livedrop_lib::error::ApiError;
use livedrop_lib::models::{
    CustomerInput, MergeRequest, OrderItem, ProductInput, ProductQuery,
};

#[derive(Default)]
struct Recorded {
    hits: HashMap<&'static str, usize>,
    merges: Vec<(i64, Value)>,
    dashboard_failures: usize,
}

#[derive(Clone, Default)]
struct Backend(Arc<Mutex<Recorded>>);

impl Backend {
    fn hit(&self, route: &'static str) -> usize {
        let mut rec = self.0.lock().unwrap();
        let n = rec.hits.entry(route).or_default();
        *n += 1;
        *n
    }

    fn hits(&self, route: &'static str) -> usize {
        self.0.lock().unwrap().hits.get(route).copied().unwrap_or(0)
    }
}

fn product(id: i64) -> Value {
    json!({
        "id": id,
        "name": "Lawn Suit",
        "sku": format!("LS-{id}"),
        "price": "2500.00",
        "cost": 1800,
        "stock": 12,
        "emoji": "👗"
    })
}

async fn list_products(State(b): State<Backend>) -> Json<Value> {
    b.hit("products");
    Json(json!([product(1), product(2)]))
}

async fn get_product(State(b): State<Backend>, Path(id): Path<i64>) -> Response {
    b.hit("product");
    if id == 404 {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Product not found" })))
            .into_response();
    }
    Json(product(id)).into_response()
}

async fn create_product(State(b): State<Backend>, Json(body): Json<Value>) -> Response {
    b.hit("create_product");
    let mut created = body.clone();
    created["id"] = json!(50);
    (StatusCode::CREATED, Json(created)).into_response()
}

async fn create_customer(State(b): State<Backend>) -> Response {
    b.hit("create_customer");
    StatusCode::CONFLICT.into_response()
}

async fn check_existing(
    State(b): State<Backend>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<Value> {
    b.hit("check_existing");
    match q.get("customer_id").map(String::as_str) {
        Some("1") => Json(json!({
            "order": {
                "id": 7, "customer_id": 1, "session_id": q.get("session_id"),
                "items": [], "subtotal": 500, "delivery": 200, "discount": 0,
                "total": 700, "payment": "cod", "status": "pending"
            }
        })),
        Some("2") => Json(json!({})),
        _ => Json(Value::Null),
    }
}

async fn merge(
    State(b): State<Backend>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Json<Value> {
    b.0.lock().unwrap().merges.push((id, body));
    Json(json!({ "success": true }))
}

async fn lookup(State(b): State<Backend>, Query(q): Query<HashMap<String, String>>) -> Json<Value> {
    b.hit("lookup");
    match q.get("code").map(String::as_str) {
        Some("8964000123456") => Json(json!([product(3)])),
        _ => Json(json!([])),
    }
}

async fn dashboard(State(b): State<Backend>) -> Response {
    b.hit("dashboard");
    let fail = {
        let mut rec = b.0.lock().unwrap();
        if rec.dashboard_failures > 0 {
            rec.dashboard_failures -= 1;
            true
        } else {
            false
        }
    };
    if fail {
        return (StatusCode::BAD_GATEWAY, "<html>upstream</html>").into_response();
    }
    Json(json!({ "total_orders": 9, "pending_orders": "4", "collected_revenue": 1200.5 }))
        .into_response()
}

async fn dispatch_all(State(b): State<Backend>) -> Json<Value> {
    b.hit("dispatch_all");
    Json(json!({ "affected": 3 }))
}

async fn spawn_backend() -> (ApiClient, Backend) {
    let state = Backend::default();
    let app = Router::new()
        .route("/api/products", get(list_products).post(create_product))
        .route("/api/products/{id}", get(get_product))
        .route("/api/customers", post(create_customer))
        .route("/api/orders/check-existing", get(check_existing))
        .route("/api/orders/{id}/merge", patch(merge))
        .route("/api/scanner/lookup", get(lookup))
        .route("/api/dashboard", get(dashboard))
        .route("/api/dispatch/all", patch(dispatch_all))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = AppConfig {
        api_base_url: format!("http://{addr}/api"),
        ..Default::default()
    };
    (ApiClient::new(&config).unwrap(), state)
}

#[tokio::test]
async fn test_reads_are_cached_until_a_mutation() {
    let (api, backend) = spawn_backend().await;

    let first = api.list_products(&ProductQuery::default()).await.unwrap();
    let second = api.list_products(&ProductQuery::default()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first[0].price, 2500.0);
    assert_eq!(backend.hits("products"), 1);

    let input = ProductInput {
        name: "Chiffon Dupatta".into(),
        sku: "CD-1".into(),
        price: 900.0,
        ..Default::default()
    };
    let created = api.create_product(&input).await.unwrap();
    assert_eq!(created.id, 50);
    // Price band defaults were filled before sending.
    assert_eq!(created.market_low, Some(720.0));

    api.list_products(&ProductQuery::default()).await.unwrap();
    assert_eq!(backend.hits("products"), 2);
}

#[tokio::test]
async fn test_error_body_is_unwrapped() {
    let (api, _) = spawn_backend().await;
    match api.get_product(404).await {
        Err(ApiError::Status { status, message }) => {
            assert_eq!(status, 404);
            assert_eq!(message, "Product not found");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_status_fallback_without_error_body() {
    let (api, backend) = spawn_backend().await;
    let input = CustomerInput {
        name: "Sana".into(),
        phone: "03001234567".into(),
        ..Default::default()
    };
    let err = api.create_customer(&input).await.unwrap_err();
    assert_eq!(err.to_string(), "Conflicts with existing data");
    // Mutations are never retried.
    assert_eq!(backend.hits("create_customer"), 1);
}

#[tokio::test]
async fn test_validation_blocks_the_request() {
    let (api, backend) = spawn_backend().await;
    let err = api.create_customer(&CustomerInput::default()).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
    assert_eq!(backend.hits("create_customer"), 0);
}

#[tokio::test]
async fn test_failed_get_is_retried_once() {
    let (api, backend) = spawn_backend().await;
    backend.0.lock().unwrap().dashboard_failures = 1;
    let dashboard = api.dashboard().await.unwrap();
    assert_eq!(dashboard.pending_orders, 4);
    assert_eq!(backend.hits("dashboard"), 2);

    api.clear_cache();
    backend.0.lock().unwrap().dashboard_failures = 2;
    let err = api.dashboard().await.unwrap_err();
    assert_eq!(err.status(), Some(502));
    assert_eq!(err.to_string(), "Backend server error (HTTP 502)");
}

#[tokio::test]
async fn test_check_existing_answer_shapes() {
    let (api, backend) = spawn_backend().await;
    let found = api.check_existing(1, Some(4)).await.unwrap().unwrap();
    assert_eq!(found.id, 7);
    assert_eq!(found.total, 700.0);
    assert!(api.check_existing(2, None).await.unwrap().is_none());
    assert!(api.check_existing(3, None).await.unwrap().is_none());

    // Never served from cache.
    api.check_existing(1, Some(4)).await.unwrap();
    assert_eq!(backend.hits("check_existing"), 4);
}

#[tokio::test]
async fn test_merge_sends_only_new_items() {
    let (api, backend) = spawn_backend().await;
    let item = OrderItem {
        product_id: 3,
        product_name: "Kurta".into(),
        emoji: "👕".into(),
        unit_price: 1200.0,
        qty: 2,
        line_total: 2400.0,
    };
    api.merge_order(
        7,
        &MergeRequest {
            items: vec![item],
            notes: Some("gift wrap".into()),
        },
    )
    .await
    .unwrap();

    let merges = backend.0.lock().unwrap().merges.clone();
    assert_eq!(merges.len(), 1);
    let (id, body) = &merges[0];
    assert_eq!(*id, 7);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["items"][0]["qty"], 2);
    assert_eq!(body["notes"], "gift wrap");
}

#[tokio::test]
async fn test_scanner_lookup_bypasses_cache() {
    let (api, backend) = spawn_backend().await;
    let hit = api.scanner_lookup("8964000123456").await.unwrap();
    assert_eq!(hit[0].id, 3);
    assert!(api.scanner_lookup("000").await.unwrap().is_empty());
    api.scanner_lookup("8964000123456").await.unwrap();
    assert_eq!(backend.hits("lookup"), 3);
}

#[tokio::test]
async fn test_dispatch_all_reports_affected() {
    let (api, _) = spawn_backend().await;
    assert_eq!(api.dispatch_all().await.unwrap().affected, 3);
}

#[tokio::test]
async fn test_unreachable_backend() {
    let config = AppConfig {
        api_base_url: "http://127.0.0.1:9/api".into(),
        get_retries: 0,
        ..Default::default()
    };
    let api = ApiClient::new(&config).unwrap();
    let err = api.dashboard().await.unwrap_err();
    assert!(matches!(err, ApiError::Unreachable(_)), "{err:?}");
}
