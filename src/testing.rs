//! In-memory [`Backend`] for workflow tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::Backend;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    Customer, CustomerId, CustomerInput, Dashboard, DispatchAllResult, DispatchFilter,
    DispatchGroup, MergeRequest, NewOrder, Order, OrderId, OrderStatus, Product, ProductId,
    SessionId, StoreSettings,
};

#[derive(Default)]
struct FakeState {
    products: Vec<Product>,
    customers: Vec<Customer>,
    orders: Vec<Order>,
    created: Vec<NewOrder>,
    merges: Vec<(OrderId, MergeRequest)>,
    status_updates: Vec<(OrderId, OrderStatus)>,
    customer_dispatches: Vec<CustomerId>,
    dispatch_all_calls: usize,
    lookups: Vec<String>,
    settings: StoreSettings,
    fail_next: Option<String>,
    delay: Option<Duration>,
    customer_delays: HashMap<CustomerId, Duration>,
    fail_list_dispatch: bool,
    next_id: i64,
}

pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_id: 100,
                ..Default::default()
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn insert_product(&self, product: Product) {
        self.with(|s| s.products.push(product));
    }

    pub fn insert_customer(&self, customer: Customer) {
        self.with(|s| s.customers.push(customer));
    }

    pub fn insert_order(&self, order: Order) {
        self.with(|s| s.orders.push(order));
    }

    pub fn set_settings(&self, settings: StoreSettings) {
        self.with(|s| s.settings = settings);
    }

    /// Fail the next call with a 400 carrying `message`.
    pub fn fail_next(&self, message: &str) {
        self.with(|s| s.fail_next = Some(message.to_string()));
    }

    /// Sleep before answering every call.
    pub fn set_delay(&self, delay: Duration) {
        self.with(|s| s.delay = Some(delay));
    }

    /// Extra latency for fetching one customer record.
    pub fn slow_customer(&self, id: CustomerId, delay: Duration) {
        self.with(|s| {
            s.customer_delays.insert(id, delay);
        });
    }

    /// Make every dispatch listing fail with a timeout.
    pub fn fail_list_dispatch(&self, fail: bool) {
        self.with(|s| s.fail_list_dispatch = fail);
    }

    pub fn created_orders(&self) -> Vec<NewOrder> {
        self.with(|s| s.created.clone())
    }

    pub fn merges(&self) -> Vec<(OrderId, MergeRequest)> {
        self.with(|s| s.merges.clone())
    }

    pub fn status_updates(&self) -> Vec<(OrderId, OrderStatus)> {
        self.with(|s| s.status_updates.clone())
    }

    pub fn customer_dispatches(&self) -> Vec<CustomerId> {
        self.with(|s| s.customer_dispatches.clone())
    }

    pub fn dispatch_all_calls(&self) -> usize {
        self.with(|s| s.dispatch_all_calls)
    }

    pub fn lookups(&self) -> Vec<String> {
        self.with(|s| s.lookups.clone())
    }

    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.with(|s| s.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn enter(&self) -> ApiResult<()> {
        let (delay, failure) = self.with(|s| (s.delay, s.fail_next.take()));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(message) => Err(ApiError::Status {
                status: 400,
                message,
            }),
            None => Ok(()),
        }
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError::Status {
        status: 404,
        message: format!("{what} not found"),
    }
}

fn contains_ci(haystack: &str, q: &str) -> bool {
    haystack.to_lowercase().contains(&q.to_lowercase())
}

#[async_trait]
impl Backend for FakeBackend {
    async fn search_products(&self, q: &str) -> ApiResult<Vec<Product>> {
        self.enter().await?;
        Ok(self.with(|s| {
            s.products
                .iter()
                .filter(|p| contains_ci(&p.name, q) || contains_ci(&p.sku, q))
                .cloned()
                .collect()
        }))
    }

    async fn catalog(&self) -> ApiResult<Vec<Product>> {
        self.enter().await?;
        Ok(self.with(|s| s.products.clone()))
    }

    async fn get_product(&self, id: ProductId) -> ApiResult<Product> {
        self.enter().await?;
        self.with(|s| s.products.iter().find(|p| p.id == id).cloned())
            .ok_or_else(|| not_found("Product"))
    }

    async fn get_customer(&self, id: CustomerId) -> ApiResult<Customer> {
        self.enter().await?;
        if let Some(delay) = self.with(|s| s.customer_delays.get(&id).copied()) {
            tokio::time::sleep(delay).await;
        }
        self.with(|s| s.customers.iter().find(|c| c.id == id).cloned())
            .ok_or_else(|| not_found("Customer"))
    }

    async fn search_customers(&self, q: &str) -> ApiResult<Vec<Customer>> {
        self.enter().await?;
        Ok(self.with(|s| {
            s.customers
                .iter()
                .filter(|c| contains_ci(&c.name, q) || c.phone.contains(q))
                .cloned()
                .collect()
        }))
    }

    async fn create_customer(&self, input: &CustomerInput) -> ApiResult<Customer> {
        self.enter().await?;
        Ok(self.with(|s| {
            s.next_id += 1;
            let customer = Customer {
                id: s.next_id,
                name: input.name.clone(),
                phone: input.phone.clone(),
                city: input.city.clone(),
                address: input.address.clone(),
                ..Default::default()
            };
            s.customers.push(customer.clone());
            customer
        }))
    }

    async fn check_existing(
        &self,
        customer_id: CustomerId,
        session_id: Option<SessionId>,
    ) -> ApiResult<Option<Order>> {
        self.enter().await?;
        Ok(self.with(|s| {
            s.orders
                .iter()
                .filter(|o| {
                    o.customer_id == customer_id
                        && o.status == OrderStatus::Pending
                        && (session_id.is_none() || o.session_id == session_id)
                })
                .max_by_key(|o| o.id)
                .cloned()
        }))
    }

    async fn create_order(&self, order: &NewOrder) -> ApiResult<Order> {
        self.enter().await?;
        Ok(self.with(|s| {
            s.next_id += 1;
            let created = Order {
                id: s.next_id,
                customer_id: order.customer_id,
                session_id: order.session_id,
                items: order.items.clone(),
                subtotal: order.subtotal,
                delivery: order.delivery,
                discount: order.discount,
                total: order.total,
                payment: order.payment,
                notes: Some(order.notes.clone()).filter(|n| !n.is_empty()),
                status: order.status,
                ..Default::default()
            };
            s.created.push(order.clone());
            s.orders.push(created.clone());
            created
        }))
    }

    async fn merge_order(&self, id: OrderId, request: &MergeRequest) -> ApiResult<()> {
        self.enter().await?;
        self.with(|s| -> ApiResult<()> {
            let order = s
                .orders
                .iter_mut()
                .find(|o| o.id == id)
                .ok_or_else(|| not_found("Order"))?;
            for item in &request.items {
                match order.items.iter_mut().find(|i| i.product_id == item.product_id) {
                    Some(existing) => {
                        existing.qty += item.qty;
                        existing.recompute();
                    }
                    None => order.items.push(item.clone()),
                }
            }
            order.subtotal = order.items.iter().map(|i| i.line_total).sum();
            order.total = order.subtotal + order.delivery - order.discount;
            s.merges.push((id, request.clone()));
            Ok(())
        })
    }

    async fn get_order(&self, id: OrderId) -> ApiResult<Order> {
        self.enter().await?;
        self.order(id).ok_or_else(|| not_found("Order"))
    }

    async fn update_order_status(&self, id: OrderId, status: OrderStatus) -> ApiResult<()> {
        self.enter().await?;
        self.with(|s| -> ApiResult<()> {
            let order = s
                .orders
                .iter_mut()
                .find(|o| o.id == id)
                .ok_or_else(|| not_found("Order"))?;
            order.status = status;
            s.status_updates.push((id, status));
            Ok(())
        })
    }

    async fn list_dispatch(&self, filter: DispatchFilter) -> ApiResult<Vec<DispatchGroup>> {
        self.enter().await?;
        if self.with(|s| s.fail_list_dispatch) {
            return Err(ApiError::Timeout("/dispatch".into()));
        }
        Ok(self.with(|s| {
            let mut groups: Vec<DispatchGroup> = Vec::new();
            for order in &s.orders {
                let keep = match filter {
                    DispatchFilter::Pending => order.status == OrderStatus::Pending,
                    DispatchFilter::Processing => order.status == OrderStatus::Processing,
                    DispatchFilter::Dispatched => order.status == OrderStatus::Dispatched,
                    DispatchFilter::All => order.status != OrderStatus::Cancelled,
                };
                if !keep {
                    continue;
                }
                match groups.iter_mut().find(|g| g.customer_id == order.customer_id) {
                    Some(group) => group.orders.push(order.clone()),
                    None => {
                        let customer = s.customers.iter().find(|c| c.id == order.customer_id);
                        groups.push(DispatchGroup {
                            customer_id: order.customer_id,
                            customer_name: customer.map(|c| c.name.clone()).unwrap_or_default(),
                            customer_phone: customer.map(|c| c.phone.clone()),
                            orders: vec![order.clone()],
                            ..Default::default()
                        });
                    }
                }
            }
            groups
        }))
    }

    async fn dispatch_customer(&self, customer_id: CustomerId) -> ApiResult<DispatchAllResult> {
        self.enter().await?;
        Ok(self.with(|s| {
            let mut affected = 0;
            for order in s.orders.iter_mut().filter(|o| {
                o.customer_id == customer_id
                    && matches!(o.status, OrderStatus::Pending | OrderStatus::Processing)
            }) {
                order.status = OrderStatus::Dispatched;
                affected += 1;
            }
            s.customer_dispatches.push(customer_id);
            DispatchAllResult { affected }
        }))
    }

    async fn dispatch_all(&self) -> ApiResult<DispatchAllResult> {
        self.enter().await?;
        Ok(self.with(|s| {
            let mut affected = 0;
            for order in s
                .orders
                .iter_mut()
                .filter(|o| o.status == OrderStatus::Pending)
            {
                order.status = OrderStatus::Dispatched;
                affected += 1;
            }
            s.dispatch_all_calls += 1;
            DispatchAllResult { affected }
        }))
    }

    async fn scanner_lookup(&self, code: &str) -> ApiResult<Vec<Product>> {
        self.enter().await?;
        Ok(self.with(|s| {
            s.lookups.push(code.to_string());
            s.products
                .iter()
                .filter(|p| {
                    p.sku.eq_ignore_ascii_case(code) || p.barcode.as_deref() == Some(code)
                })
                .cloned()
                .collect()
        }))
    }

    async fn dashboard(&self) -> ApiResult<Dashboard> {
        self.enter().await?;
        Ok(self.with(|s| Dashboard {
            total_orders: s.orders.len() as i64,
            pending_orders: s
                .orders
                .iter()
                .filter(|o| o.status == OrderStatus::Pending)
                .count() as i64,
            total_customers: s.customers.len() as i64,
            total_products: s.products.len() as i64,
            ..Default::default()
        }))
    }

    async fn pending_order_count(&self) -> ApiResult<usize> {
        self.enter().await?;
        Ok(self.with(|s| {
            s.orders
                .iter()
                .filter(|o| o.status == OrderStatus::Pending)
                .count()
        }))
    }

    async fn settings(&self) -> ApiResult<StoreSettings> {
        self.enter().await?;
        Ok(self.with(|s| s.settings.clone()))
    }
}
