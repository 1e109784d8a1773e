//! Backend REST client.
//!
//! Typed wrappers over every resource group under `/api`. GET responses are
//! cached for the staleness window and retried once on transient failure;
//! every mutation drops the cached entries of the resource groups it
//! touches, so the next read after a save goes to the backend.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::{normalize_api_url, AppConfig};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    Customer, CustomerId, CustomerInput, Dashboard, DispatchAllResult, DispatchFilter,
    DispatchGroup, MergeRequest, NewOrder, Order, OrderId, OrderQuery, OrderStatus, Product,
    ProductId, ProductInput, ProductQuery, Session, SessionId, SessionInput, StoreSettings,
};

// Cache groups, matched as path prefixes.
const PRODUCTS: &str = "/products";
const CUSTOMERS: &str = "/customers";
const SESSIONS: &str = "/sessions";
const ORDERS: &str = "/orders";
const DISPATCH: &str = "/dispatch";
const DASHBOARD: &str = "/dashboard";
const SETTINGS: &str = "/settings";

/// Upper bound used when counting pending orders for the sidebar badge.
const PENDING_COUNT_LIMIT: u32 = 1000;

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn transport_error(url: &str, err: &reqwest::Error) -> ApiError {
    if err.is_connect() {
        return ApiError::Unreachable(url.to_string());
    }
    if err.is_timeout() {
        return ApiError::Timeout(url.to_string());
    }
    if err.is_builder() {
        return ApiError::Network(format!("Invalid backend URL: {url}"));
    }
    ApiError::Network(err.to_string())
}

fn status_fallback(status: StatusCode) -> String {
    match status.as_u16() {
        400 => "Invalid request".to_string(),
        404 => "Not found".to_string(),
        409 => "Conflicts with existing data".to_string(),
        s if s >= 500 => format!("Backend server error (HTTP {s})"),
        s => format!("Unexpected response from backend (HTTP {s})"),
    }
}

/// Unwrap the backend's `{ "error": "..." }` body into a single message.
pub(crate) fn error_from_body(status: StatusCode, body: &str) -> ApiError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| status_fallback(status));
    ApiError::Status {
        status: status.as_u16(),
        message,
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> ApiResult<T> {
    serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}

fn to_body<B: Serialize>(body: &B) -> ApiResult<Value> {
    serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))
}

/// `check-existing` answers `null`, `{}`, `{ "order": {...} }` or the order
/// itself depending on backend version.
fn existing_from_value(value: Value) -> ApiResult<Option<Order>> {
    let candidate = match value {
        Value::Object(mut obj) => match obj.remove("order") {
            Some(inner) => inner,
            None => Value::Object(obj),
        },
        other => other,
    };
    if candidate.get("id").map_or(true, Value::is_null) {
        return Ok(None);
    }
    decode(candidate).map(Some)
}

// ---------------------------------------------------------------------------
// Query cache
// ---------------------------------------------------------------------------

struct CacheEntry {
    value: Value,
    fetched: Instant,
}

/// GET results keyed by path + query string.
pub(crate) struct QueryCache {
    stale_after: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl QueryCache {
    pub(crate) fn new(stale_after: Duration) -> Self {
        Self {
            stale_after,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn key(path: &str, query: &[(&str, String)]) -> String {
        if query.is_empty() {
            return path.to_string();
        }
        let mut pairs: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort();
        format!("{path}?{}", pairs.join("&"))
    }

    pub(crate) fn fresh(&self, key: &str) -> Option<Value> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|entry| entry.fetched.elapsed() < self.stale_after)
            .map(|entry| entry.value.clone())
    }

    pub(crate) fn store(&self, key: String, value: Value) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key,
            CacheEntry {
                value,
                fetched: Instant::now(),
            },
        );
    }

    pub(crate) fn invalidate(&self, groups: &[&str]) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|key, _| !groups.iter().any(|g| key.starts_with(g)));
    }

    pub(crate) fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ApiClient {
    http: Client,
    base: String,
    retries: u32,
    cache: QueryCache,
}

impl ApiClient {
    pub fn new(config: &AppConfig) -> ApiResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base: normalize_api_url(&config.api_base_url),
            retries: config.get_retries,
            cache: QueryCache::new(config.cache_staleness()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Drop every cached read, e.g. after the operator switches backends.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn invalidate(&self, groups: &[&str]) {
        self.cache.invalidate(groups);
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn execute(&self, req: RequestBuilder, url: &str) -> ApiResult<Value> {
        let resp = req.send().await.map_err(|e| transport_error(url, &e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| transport_error(url, &e))?;

        if !status.is_success() {
            return Err(error_from_body(status, &text));
        }
        // Empty 204 bodies come back as null.
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn get_value(
        &self,
        path: &str,
        query: &[(&str, String)],
        use_cache: bool,
    ) -> ApiResult<Value> {
        let key = QueryCache::key(path, query);
        if use_cache {
            if let Some(hit) = self.cache.fresh(&key) {
                debug!(key = %key, "cache hit");
                return Ok(hit);
            }
        }

        let url = self.url(path);
        let mut attempt = 0;
        loop {
            let req = self.http.get(&url).query(query);
            match self.execute(req, &url).await {
                Ok(value) => {
                    if use_cache {
                        self.cache.store(key, value.clone());
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.retries && e.is_transient() => {
                    attempt += 1;
                    warn!(path, attempt, error = %e, "GET failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> ApiResult<T> {
        decode(self.get_value(path, query, true).await?)
    }

    async fn get_uncached<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ApiResult<T> {
        decode(self.get_value(path, query, false).await?)
    }

    /// Send a mutation. Mutations are never retried.
    async fn mutate(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        invalidates: &[&str],
    ) -> ApiResult<Value> {
        let url = self.url(path);
        let mut req = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let result = self.execute(req, &url).await;
        match &result {
            Ok(_) => {
                self.cache.invalidate(invalidates);
                debug!(%method, path, "mutation succeeded");
            }
            Err(e) => warn!(%method, path, error = %e, "mutation failed"),
        }
        result
    }

    // -----------------------------------------------------------------------
    // Products
    // -----------------------------------------------------------------------

    pub async fn list_products(&self, query: &ProductQuery) -> ApiResult<Vec<Product>> {
        let mut params = Vec::new();
        if let Some(q) = query.q.as_deref().filter(|q| !q.is_empty()) {
            params.push(("q", q.to_string()));
        }
        if let Some(c) = query.category.as_deref().filter(|c| !c.is_empty()) {
            params.push(("category", c.to_string()));
        }
        self.get(PRODUCTS, &params).await
    }

    pub async fn get_product(&self, id: ProductId) -> ApiResult<Product> {
        self.get(&format!("{PRODUCTS}/{id}"), &[]).await
    }

    pub async fn product_categories(&self) -> ApiResult<Vec<String>> {
        self.get(&format!("{PRODUCTS}/meta/categories"), &[]).await
    }

    pub async fn create_product(&self, input: &ProductInput) -> ApiResult<Product> {
        input.validate()?;
        let body = to_body(&input.clone().with_price_defaults())?;
        let created = self
            .mutate(Method::POST, PRODUCTS, Some(body), &[PRODUCTS, DASHBOARD])
            .await?;
        info!(sku = %input.sku, "product created");
        decode(created)
    }

    pub async fn update_product(&self, id: ProductId, input: &ProductInput) -> ApiResult<Product> {
        input.validate()?;
        let body = to_body(&input.clone().with_price_defaults())?;
        decode(
            self.mutate(
                Method::PUT,
                &format!("{PRODUCTS}/{id}"),
                Some(body),
                &[PRODUCTS, DASHBOARD],
            )
            .await?,
        )
    }

    pub async fn update_stock(&self, id: ProductId, stock: i64) -> ApiResult<Value> {
        if stock < 0 {
            return Err(ApiError::Validation("Stock cannot be negative".into()));
        }
        self.mutate(
            Method::PATCH,
            &format!("{PRODUCTS}/{id}/stock"),
            Some(serde_json::json!({ "stock": stock })),
            &[PRODUCTS, DASHBOARD],
        )
        .await
    }

    pub async fn delete_product(&self, id: ProductId) -> ApiResult<Value> {
        self.mutate(
            Method::DELETE,
            &format!("{PRODUCTS}/{id}"),
            None,
            &[PRODUCTS, DASHBOARD],
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Customers
    // -----------------------------------------------------------------------

    pub async fn list_customers(&self, q: Option<&str>) -> ApiResult<Vec<Customer>> {
        let params: Vec<(&str, String)> = q
            .filter(|q| !q.is_empty())
            .map(|q| vec![("q", q.to_string())])
            .unwrap_or_default();
        self.get(CUSTOMERS, &params).await
    }

    pub async fn get_customer(&self, id: CustomerId) -> ApiResult<Customer> {
        self.get(&format!("{CUSTOMERS}/{id}"), &[]).await
    }

    pub async fn customer_orders(&self, id: CustomerId) -> ApiResult<Vec<Order>> {
        self.get(&format!("{CUSTOMERS}/{id}/orders"), &[]).await
    }

    pub async fn create_customer(&self, input: &CustomerInput) -> ApiResult<Customer> {
        input.validate()?;
        let created = self
            .mutate(Method::POST, CUSTOMERS, Some(to_body(input)?), &[CUSTOMERS])
            .await?;
        decode(created)
    }

    pub async fn update_customer(
        &self,
        id: CustomerId,
        input: &CustomerInput,
    ) -> ApiResult<Customer> {
        input.validate()?;
        decode(
            self.mutate(
                Method::PUT,
                &format!("{CUSTOMERS}/{id}"),
                Some(to_body(input)?),
                &[CUSTOMERS, DISPATCH],
            )
            .await?,
        )
    }

    pub async fn delete_customer(&self, id: CustomerId) -> ApiResult<Value> {
        self.mutate(
            Method::DELETE,
            &format!("{CUSTOMERS}/{id}"),
            None,
            &[CUSTOMERS, DASHBOARD],
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    pub async fn list_sessions(&self) -> ApiResult<Vec<Session>> {
        self.get(SESSIONS, &[]).await
    }

    pub async fn get_session(&self, id: SessionId) -> ApiResult<Session> {
        self.get(&format!("{SESSIONS}/{id}"), &[]).await
    }

    pub async fn create_session(&self, input: &SessionInput) -> ApiResult<Session> {
        input.validate()?;
        decode(
            self.mutate(Method::POST, SESSIONS, Some(to_body(input)?), &[SESSIONS, DASHBOARD])
                .await?,
        )
    }

    pub async fn update_session(&self, id: SessionId, input: &SessionInput) -> ApiResult<Session> {
        input.validate()?;
        decode(
            self.mutate(
                Method::PUT,
                &format!("{SESSIONS}/{id}"),
                Some(to_body(input)?),
                &[SESSIONS],
            )
            .await?,
        )
    }

    pub async fn delete_session(&self, id: SessionId) -> ApiResult<Value> {
        self.mutate(
            Method::DELETE,
            &format!("{SESSIONS}/{id}"),
            None,
            &[SESSIONS, DASHBOARD],
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    pub async fn list_orders(&self, query: &OrderQuery) -> ApiResult<Vec<Order>> {
        let mut params = Vec::new();
        if let Some(status) = query.status {
            params.push(("status", status.as_str().to_string()));
        }
        if let Some(cid) = query.customer_id {
            params.push(("customer_id", cid.to_string()));
        }
        if let Some(sid) = query.session_id {
            params.push(("session_id", sid.to_string()));
        }
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        self.get(ORDERS, &params).await
    }

    pub async fn get_order(&self, id: OrderId) -> ApiResult<Order> {
        self.get(&format!("{ORDERS}/{id}"), &[]).await
    }

    /// Always hits the backend: a stale answer here would merge into the
    /// wrong order.
    pub async fn check_existing(
        &self,
        customer_id: CustomerId,
        session_id: Option<SessionId>,
    ) -> ApiResult<Option<Order>> {
        let mut params = vec![("customer_id", customer_id.to_string())];
        if let Some(sid) = session_id {
            params.push(("session_id", sid.to_string()));
        }
        let value: Value = self
            .get_uncached(&format!("{ORDERS}/check-existing"), &params)
            .await?;
        existing_from_value(value)
    }

    pub async fn create_order(&self, order: &NewOrder) -> ApiResult<Order> {
        let created = self
            .mutate(
                Method::POST,
                ORDERS,
                Some(to_body(order)?),
                &[ORDERS, DASHBOARD, PRODUCTS, DISPATCH, SESSIONS],
            )
            .await?;
        decode(created)
    }

    pub async fn merge_order(&self, id: OrderId, request: &MergeRequest) -> ApiResult<Value> {
        self.mutate(
            Method::PATCH,
            &format!("{ORDERS}/{id}/merge"),
            Some(to_body(request)?),
            &[ORDERS, DASHBOARD, PRODUCTS, DISPATCH, SESSIONS],
        )
        .await
    }

    /// Generic field update (`PUT /orders/{id}`), e.g. payment or notes.
    pub async fn update_order(&self, id: OrderId, patch: &Value) -> ApiResult<Value> {
        self.mutate(
            Method::PUT,
            &format!("{ORDERS}/{id}"),
            Some(patch.clone()),
            &[ORDERS, DASHBOARD, DISPATCH],
        )
        .await
    }

    pub async fn update_order_status(&self, id: OrderId, status: OrderStatus) -> ApiResult<Value> {
        self.mutate(
            Method::PATCH,
            &format!("{ORDERS}/{id}/status"),
            Some(serde_json::json!({ "status": status })),
            &[ORDERS, DASHBOARD, DISPATCH, SESSIONS],
        )
        .await
    }

    pub async fn delete_order(&self, id: OrderId) -> ApiResult<Value> {
        self.mutate(
            Method::DELETE,
            &format!("{ORDERS}/{id}"),
            None,
            &[ORDERS, DASHBOARD, DISPATCH, SESSIONS, PRODUCTS],
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    pub async fn list_dispatch(&self, filter: DispatchFilter) -> ApiResult<Vec<DispatchGroup>> {
        self.get(DISPATCH, &[("status", filter.as_str().to_string())])
            .await
    }

    pub async fn dispatch_customer(&self, customer_id: CustomerId) -> ApiResult<DispatchAllResult> {
        let value = self
            .mutate(
                Method::PATCH,
                &format!("{DISPATCH}/customer/{customer_id}"),
                Some(serde_json::json!({ "status": OrderStatus::Dispatched })),
                &[DISPATCH, ORDERS, DASHBOARD],
            )
            .await?;
        Ok(decode(value).unwrap_or_default())
    }

    pub async fn dispatch_all(&self) -> ApiResult<DispatchAllResult> {
        let value = self
            .mutate(
                Method::PATCH,
                &format!("{DISPATCH}/all"),
                None,
                &[DISPATCH, ORDERS, DASHBOARD],
            )
            .await?;
        Ok(decode(value).unwrap_or_default())
    }

    // -----------------------------------------------------------------------
    // Dashboard, settings, scanner
    // -----------------------------------------------------------------------

    pub async fn dashboard(&self) -> ApiResult<Dashboard> {
        self.get(DASHBOARD, &[]).await
    }

    pub async fn settings(&self) -> ApiResult<StoreSettings> {
        self.get(SETTINGS, &[]).await
    }

    pub async fn save_settings(&self, settings: &StoreSettings) -> ApiResult<Value> {
        self.mutate(
            Method::PUT,
            SETTINGS,
            Some(to_body(settings)?),
            &[SETTINGS],
        )
        .await
    }

    /// Lookups are never cached: a product created after a failed scan must
    /// be found on the next scan.
    pub async fn scanner_lookup(&self, code: &str) -> ApiResult<Vec<Product>> {
        self.get_uncached("/scanner/lookup", &[("code", code.to_string())])
            .await
    }

    pub async fn pending_order_count(&self) -> ApiResult<usize> {
        let orders = self
            .list_orders(&OrderQuery {
                status: Some(OrderStatus::Pending),
                limit: Some(PENDING_COUNT_LIMIT),
                ..Default::default()
            })
            .await?;
        Ok(orders.len())
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn search_products(&self, q: &str) -> ApiResult<Vec<Product>> {
        self.list_products(&ProductQuery {
            q: Some(q.to_string()),
            category: None,
        })
        .await
    }

    async fn catalog(&self) -> ApiResult<Vec<Product>> {
        self.list_products(&ProductQuery::default()).await
    }

    async fn get_product(&self, id: ProductId) -> ApiResult<Product> {
        ApiClient::get_product(self, id).await
    }

    async fn get_customer(&self, id: CustomerId) -> ApiResult<Customer> {
        ApiClient::get_customer(self, id).await
    }

    async fn search_customers(&self, q: &str) -> ApiResult<Vec<Customer>> {
        self.list_customers(Some(q)).await
    }

    async fn create_customer(&self, input: &CustomerInput) -> ApiResult<Customer> {
        ApiClient::create_customer(self, input).await
    }

    async fn check_existing(
        &self,
        customer_id: CustomerId,
        session_id: Option<SessionId>,
    ) -> ApiResult<Option<Order>> {
        ApiClient::check_existing(self, customer_id, session_id).await
    }

    async fn create_order(&self, order: &NewOrder) -> ApiResult<Order> {
        ApiClient::create_order(self, order).await
    }

    async fn merge_order(&self, id: OrderId, request: &MergeRequest) -> ApiResult<()> {
        ApiClient::merge_order(self, id, request).await.map(|_| ())
    }

    async fn get_order(&self, id: OrderId) -> ApiResult<Order> {
        ApiClient::get_order(self, id).await
    }

    async fn update_order_status(&self, id: OrderId, status: OrderStatus) -> ApiResult<()> {
        ApiClient::update_order_status(self, id, status)
            .await
            .map(|_| ())
    }

    async fn list_dispatch(&self, filter: DispatchFilter) -> ApiResult<Vec<DispatchGroup>> {
        ApiClient::list_dispatch(self, filter).await
    }

    async fn dispatch_customer(&self, customer_id: CustomerId) -> ApiResult<DispatchAllResult> {
        ApiClient::dispatch_customer(self, customer_id).await
    }

    async fn dispatch_all(&self) -> ApiResult<DispatchAllResult> {
        ApiClient::dispatch_all(self).await
    }

    async fn scanner_lookup(&self, code: &str) -> ApiResult<Vec<Product>> {
        ApiClient::scanner_lookup(self, code).await
    }

    async fn dashboard(&self) -> ApiResult<Dashboard> {
        ApiClient::dashboard(self).await
    }

    async fn pending_order_count(&self) -> ApiResult<usize> {
        ApiClient::pending_order_count(self).await
    }

    async fn settings(&self) -> ApiResult<StoreSettings> {
        ApiClient::settings(self).await
    }
}
