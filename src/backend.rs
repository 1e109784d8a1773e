//! The backend operations the workflows depend on.
//!
//! [`ApiClient`](crate::api::ApiClient) is the production implementation;
//! tests drive the workflows through in-memory fakes.

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::models::{
    Customer, CustomerId, CustomerInput, Dashboard, DispatchAllResult, DispatchFilter,
    DispatchGroup, MergeRequest, NewOrder, Order, OrderId, OrderStatus, Product, ProductId,
    SessionId, StoreSettings,
};

#[async_trait]
pub trait Backend: Send + Sync {
    async fn search_products(&self, q: &str) -> ApiResult<Vec<Product>>;

    /// Full product catalog (no filter).
    async fn catalog(&self) -> ApiResult<Vec<Product>>;

    async fn get_product(&self, id: ProductId) -> ApiResult<Product>;

    async fn get_customer(&self, id: CustomerId) -> ApiResult<Customer>;

    async fn search_customers(&self, q: &str) -> ApiResult<Vec<Customer>>;

    async fn create_customer(&self, input: &CustomerInput) -> ApiResult<Customer>;

    /// Most recent pending order for the (customer, session) pair.
    async fn check_existing(
        &self,
        customer_id: CustomerId,
        session_id: Option<SessionId>,
    ) -> ApiResult<Option<Order>>;

    async fn create_order(&self, order: &NewOrder) -> ApiResult<Order>;

    /// Append items to an existing order; the backend sums quantities of
    /// products already on it.
    async fn merge_order(&self, id: OrderId, request: &MergeRequest) -> ApiResult<()>;

    async fn get_order(&self, id: OrderId) -> ApiResult<Order>;

    async fn update_order_status(&self, id: OrderId, status: OrderStatus) -> ApiResult<()>;

    async fn list_dispatch(&self, filter: DispatchFilter) -> ApiResult<Vec<DispatchGroup>>;

    async fn dispatch_customer(&self, customer_id: CustomerId) -> ApiResult<DispatchAllResult>;

    async fn dispatch_all(&self) -> ApiResult<DispatchAllResult>;

    async fn scanner_lookup(&self, code: &str) -> ApiResult<Vec<Product>>;

    async fn dashboard(&self) -> ApiResult<Dashboard>;

    async fn pending_order_count(&self) -> ApiResult<usize>;

    async fn settings(&self) -> ApiResult<StoreSettings>;
}
