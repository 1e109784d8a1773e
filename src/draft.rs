//! Draft order manager.
//!
//! Owns the order being built on the New Order page: cart, customer and
//! session selection, delivery/discount/payment/note, and the pending order
//! the draft would merge into. Saving is a two-step affair: [`plan_save`]
//! resolves create-vs-merge once, the shell confirms a merge with the
//! operator, then [`execute`] sends it.
//!
//! [`plan_save`]: DraftOrder::plan_save
//! [`execute`]: DraftOrder::execute

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::cart::Cart;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    Customer, CustomerId, CustomerInput, MergeRequest, NewOrder, Order, OrderId, OrderItem,
    OrderStatus, Payment, Product, SessionId, DEFAULT_DELIVERY,
};
use crate::sequencing::{RequestSequencer, RequestToken, SearchBox};

/// Result of [`DraftOrder::finish_customer_pick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerPick {
    /// A newer pick replaced this one; nothing changed.
    Superseded,
    /// Customer selected; the existing-order check to run, if any.
    Applied(Option<ExistingCheck>),
}

/// An existing-order lookup the shell should run. Tagged so a slow answer
/// for an older selection cannot overwrite a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingCheck {
    pub token: RequestToken,
    pub customer_id: CustomerId,
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SaveMode {
    Create,
    Merge { order_id: OrderId },
}

/// What the merge confirmation shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergePreview {
    pub order_id: OrderId,
    pub existing_items: Vec<OrderItem>,
    pub items_to_add: Vec<OrderItem>,
    pub existing_subtotal: f64,
    pub added_subtotal: f64,
    /// The existing order's delivery; the draft's value is ignored.
    pub delivery: f64,
    /// The existing order's discount; the draft's value is ignored.
    pub discount: f64,
    pub merged_total: f64,
}

impl MergePreview {
    pub fn new(existing: &Order, items_to_add: &[OrderItem]) -> Self {
        let added_subtotal: f64 = items_to_add.iter().map(|i| i.line_total).sum();
        Self {
            order_id: existing.id,
            existing_items: existing.items.clone(),
            items_to_add: items_to_add.to_vec(),
            existing_subtotal: existing.subtotal,
            added_subtotal,
            delivery: existing.delivery,
            discount: existing.discount,
            merged_total: merged_total(existing, added_subtotal),
        }
    }
}

/// Total after merging `added_subtotal` into `existing`: the existing
/// order's delivery and discount carry over unchanged.
pub fn merged_total(existing: &Order, added_subtotal: f64) -> f64 {
    existing.subtotal + added_subtotal + existing.delivery - existing.discount
}

#[derive(Debug, Clone, PartialEq)]
pub enum SavePlan {
    Create(NewOrder),
    Merge {
        order_id: OrderId,
        request: MergeRequest,
        preview: MergePreview,
    },
}

impl SavePlan {
    pub fn mode(&self) -> SaveMode {
        match self {
            SavePlan::Create(_) => SaveMode::Create,
            SavePlan::Merge { order_id, .. } => SaveMode::Merge {
                order_id: *order_id,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveOutcome {
    pub mode: SaveMode,
    /// Full order as stored, for the invoice and the dispatch shortcut.
    pub order: Order,
}

/// Serializable snapshot for the shell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftView {
    pub items: Vec<OrderItem>,
    pub customer: Option<Customer>,
    pub session_id: Option<SessionId>,
    pub subtotal: f64,
    pub delivery: f64,
    pub discount: f64,
    pub total: f64,
    pub payment: Payment,
    pub note: String,
    pub can_save: bool,
    pub save_mode: SaveMode,
    pub merge_preview: Option<MergePreview>,
}

#[derive(Debug)]
pub struct DraftOrder {
    cart: Cart,
    customer: Option<Customer>,
    session_id: Option<SessionId>,
    default_delivery: f64,
    delivery: f64,
    discount: f64,
    payment: Payment,
    note: String,
    existing: Option<Order>,
    existing_seq: RequestSequencer,
    pick_seq: RequestSequencer,
    pub customer_search: SearchBox<Customer>,
    pub product_search: SearchBox<Product>,
}

impl Default for DraftOrder {
    fn default() -> Self {
        Self::new(DEFAULT_DELIVERY)
    }
}

impl DraftOrder {
    pub fn new(default_delivery: f64) -> Self {
        let default_delivery = default_delivery.max(0.0);
        Self {
            cart: Cart::new(),
            customer: None,
            session_id: None,
            default_delivery,
            delivery: default_delivery,
            discount: 0.0,
            payment: Payment::Cod,
            note: String::new(),
            existing: None,
            existing_seq: RequestSequencer::new(),
            pick_seq: RequestSequencer::new(),
            customer_search: SearchBox::new(),
            product_search: SearchBox::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn cart_mut(&mut self) -> &mut Cart {
        &mut self.cart
    }

    pub fn customer(&self) -> Option<&Customer> {
        self.customer.as_ref()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn existing(&self) -> Option<&Order> {
        self.existing.as_ref()
    }

    pub fn delivery(&self) -> f64 {
        self.delivery
    }

    pub fn discount(&self) -> f64 {
        self.discount
    }

    pub fn payment(&self) -> Payment {
        self.payment
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub fn subtotal(&self) -> f64 {
        self.cart.subtotal()
    }

    pub fn total(&self) -> f64 {
        self.cart.total(self.delivery, self.discount)
    }

    pub fn can_save(&self) -> bool {
        self.customer.is_some() && !self.cart.is_empty()
    }

    pub fn save_mode(&self) -> SaveMode {
        match &self.existing {
            Some(order) => SaveMode::Merge { order_id: order.id },
            None => SaveMode::Create,
        }
    }

    pub fn merge_preview(&self) -> Option<MergePreview> {
        self.existing
            .as_ref()
            .map(|existing| MergePreview::new(existing, self.cart.items()))
    }

    pub fn view(&self) -> DraftView {
        DraftView {
            items: self.cart.items().to_vec(),
            customer: self.customer.clone(),
            session_id: self.session_id,
            subtotal: self.subtotal(),
            delivery: self.delivery,
            discount: self.discount,
            total: self.total(),
            payment: self.payment,
            note: self.note.clone(),
            can_save: self.can_save(),
            save_mode: self.save_mode(),
            merge_preview: self.merge_preview(),
        }
    }

    // -----------------------------------------------------------------------
    // Editing
    // -----------------------------------------------------------------------

    /// Add a product picked from search or the scanner.
    pub fn add_product(&mut self, product: &Product) {
        self.cart.add_item(product);
        self.product_search.reset();
    }

    /// Set delivery. Rejected while the draft would merge: a merge keeps the
    /// existing order's charges.
    pub fn set_delivery(&mut self, delivery: f64) -> bool {
        if self.existing.is_some() {
            return false;
        }
        self.delivery = if delivery.is_finite() { delivery.max(0.0) } else { 0.0 };
        true
    }

    pub fn set_discount(&mut self, discount: f64) -> bool {
        if self.existing.is_some() {
            return false;
        }
        self.discount = if discount.is_finite() { discount.max(0.0) } else { 0.0 };
        true
    }

    pub fn set_payment(&mut self, payment: Payment) {
        self.payment = payment;
    }

    pub fn set_note(&mut self, note: &str) {
        self.note = note.to_string();
    }

    /// New default delivery from store settings; applied to the current
    /// draft only if the operator has not already changed it.
    pub fn set_default_delivery(&mut self, default_delivery: f64) {
        let default_delivery = default_delivery.max(0.0);
        if self.delivery == self.default_delivery {
            self.delivery = default_delivery;
        }
        self.default_delivery = default_delivery;
    }

    // -----------------------------------------------------------------------
    // Selection and the existing-order check
    // -----------------------------------------------------------------------

    /// Select (or clear) the customer. Returns the existing-order check to
    /// run, if any; clearing drops the current match immediately.
    pub fn select_customer(&mut self, customer: Option<Customer>) -> Option<ExistingCheck> {
        self.pick_seq.invalidate();
        match &customer {
            Some(c) => self.customer_search.set_query(&c.name),
            None => self.customer_search.reset(),
        }
        self.customer_search.close();
        self.customer = customer;
        self.begin_existing_check()
    }

    /// Start a pick whose customer record still has to be fetched. Any
    /// earlier pick still in flight becomes stale.
    pub fn begin_customer_pick(&mut self) -> RequestToken {
        self.pick_seq.issue()
    }

    pub fn is_current_pick(&self, token: RequestToken) -> bool {
        self.pick_seq.is_current(token)
    }

    /// Apply a fetched pick, unless a newer pick (or a direct selection)
    /// happened meanwhile.
    pub fn finish_customer_pick(
        &mut self,
        token: RequestToken,
        customer: Option<Customer>,
    ) -> CustomerPick {
        if !self.pick_seq.is_current(token) {
            debug!(token = token.value(), "discarding superseded customer pick");
            return CustomerPick::Superseded;
        }
        CustomerPick::Applied(self.select_customer(customer))
    }

    pub fn select_session(&mut self, session_id: Option<SessionId>) -> Option<ExistingCheck> {
        self.session_id = session_id;
        self.begin_existing_check()
    }

    fn begin_existing_check(&mut self) -> Option<ExistingCheck> {
        self.existing = None;
        let Some(customer) = &self.customer else {
            self.existing_seq.invalidate();
            return None;
        };
        Some(ExistingCheck {
            token: self.existing_seq.issue(),
            customer_id: customer.id,
            session_id: self.session_id,
        })
    }

    /// Apply the answer to `check`. Stale answers are ignored and `false`
    /// is returned.
    pub fn resolve_existing(&mut self, check: &ExistingCheck, found: Option<Order>) -> bool {
        if !self.existing_seq.is_current(check.token) {
            return false;
        }
        if let Some(order) = &found {
            info!(
                order_id = order.id,
                customer_id = check.customer_id,
                "pending order found for customer, save will merge"
            );
        }
        self.existing = found;
        true
    }

    // -----------------------------------------------------------------------
    // Saving
    // -----------------------------------------------------------------------

    /// Decide what saving does right now. `force_new` bypasses an existing
    /// match and creates a separate order.
    pub fn plan_save(&self, force_new: bool) -> ApiResult<SavePlan> {
        let Some(customer) = &self.customer else {
            return Err(ApiError::Validation("Select a customer first".into()));
        };
        if self.cart.is_empty() {
            return Err(ApiError::Validation("Add at least one product".into()));
        }

        match (&self.existing, force_new) {
            (Some(existing), false) => {
                let items = self.cart.items().to_vec();
                let note = self.note.trim();
                Ok(SavePlan::Merge {
                    order_id: existing.id,
                    preview: MergePreview::new(existing, &items),
                    request: MergeRequest {
                        items,
                        notes: (!note.is_empty()).then(|| note.to_string()),
                    },
                })
            }
            _ => Ok(SavePlan::Create(NewOrder {
                session_id: self.session_id,
                customer_id: customer.id,
                items: self.cart.items().to_vec(),
                subtotal: self.subtotal(),
                delivery: self.delivery,
                discount: self.discount,
                total: self.total(),
                payment: self.payment,
                notes: self.note.clone(),
                status: OrderStatus::Pending,
            })),
        }
    }

    /// Send `plan`. On success the draft resets; on failure it is left
    /// untouched for a retry.
    pub async fn execute(&mut self, backend: &dyn Backend, plan: SavePlan) -> ApiResult<SaveOutcome> {
        let mode = plan.mode();
        let (order_id, fallback) = match plan {
            SavePlan::Create(new_order) => {
                let created = backend.create_order(&new_order).await?;
                info!(
                    order_id = created.id,
                    customer_id = new_order.customer_id,
                    total = new_order.total,
                    "order created"
                );
                (created.id, created)
            }
            SavePlan::Merge {
                order_id, request, ..
            } => {
                backend.merge_order(order_id, &request).await?;
                info!(order_id, items = request.items.len(), "items merged into pending order");
                let fallback = self.existing.clone().unwrap_or_default();
                (order_id, fallback)
            }
        };

        let order = match backend.get_order(order_id).await {
            Ok(full) => full,
            Err(e) => {
                warn!(order_id, error = %e, "saved order could not be reloaded");
                Order {
                    id: order_id,
                    ..fallback
                }
            }
        };

        self.reset();
        Ok(SaveOutcome { mode, order })
    }

    /// Back to an empty draft; the configured default delivery is kept.
    pub fn reset(&mut self) {
        self.cart.clear();
        self.customer = None;
        self.session_id = None;
        self.note.clear();
        self.discount = 0.0;
        self.delivery = self.default_delivery;
        self.payment = Payment::Cod;
        self.existing = None;
        self.existing_seq.invalidate();
        self.pick_seq.invalidate();
        self.customer_search.reset();
        self.product_search.reset();
    }
}

// ---------------------------------------------------------------------------
// Backend round trips
//
// The draft lock is only held to read or apply state, never across a
// request, so the rest of the order page stays responsive and a newer
// selection can overtake a slow answer.
// ---------------------------------------------------------------------------

/// Run `check` against the backend and apply the answer. Returns `false`
/// when the answer was stale. A failure for a stale check is swallowed.
pub async fn run_existing_check(
    draft: &Mutex<DraftOrder>,
    backend: &dyn Backend,
    check: ExistingCheck,
) -> ApiResult<bool> {
    match backend
        .check_existing(check.customer_id, check.session_id)
        .await
    {
        Ok(found) => Ok(draft.lock().await.resolve_existing(&check, found)),
        Err(e) => {
            if !draft.lock().await.existing_seq.is_current(check.token) {
                return Ok(false);
            }
            warn!(customer_id = check.customer_id, error = %e, "existing order check failed");
            Err(e)
        }
    }
}

/// Select customer `id` (or clear the selection), fetching the record and
/// then checking for a pending order. Returns `false` when a newer pick
/// superseded this one.
pub async fn pick_customer(
    draft: &Mutex<DraftOrder>,
    backend: &dyn Backend,
    id: Option<CustomerId>,
) -> ApiResult<bool> {
    let token = draft.lock().await.begin_customer_pick();
    let customer = match id {
        Some(id) => match backend.get_customer(id).await {
            Ok(customer) => Some(customer),
            Err(_) if !draft.lock().await.is_current_pick(token) => return Ok(false),
            Err(e) => return Err(e),
        },
        None => None,
    };

    let check = match draft.lock().await.finish_customer_pick(token, customer) {
        CustomerPick::Superseded => return Ok(false),
        CustomerPick::Applied(check) => check,
    };
    if let Some(check) = check {
        run_existing_check(draft, backend, check).await?;
    }
    Ok(true)
}

/// Create a customer inline and select them.
pub async fn create_customer(
    draft: &Mutex<DraftOrder>,
    backend: &dyn Backend,
    input: &CustomerInput,
) -> ApiResult<Customer> {
    input.validate()?;
    let token = draft.lock().await.begin_customer_pick();
    let customer = backend.create_customer(input).await?;
    info!(customer_id = customer.id, "customer created from order page");

    let pick = draft
        .lock()
        .await
        .finish_customer_pick(token, Some(customer.clone()));
    if let CustomerPick::Applied(Some(check)) = pick {
        // The customer is brand new, but the check keeps the flow uniform.
        if let Err(e) = run_existing_check(draft, backend, check).await {
            warn!(error = %e, "existing order check after customer creation failed");
        }
    }
    Ok(customer)
}
