//! Dispatch board: customer-grouped orders, the packing checklist and the
//! status transitions that move orders out the door.
//!
//! Group totals shown on the board are recomputed here from the orders the
//! backend returned; they are for display only.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    CustomerId, DispatchAllResult, DispatchFilter, DispatchGroup, Order, OrderId, OrderItem,
    OrderStatus,
};
use crate::sequencing::{RequestSequencer, RequestToken};

// ---------------------------------------------------------------------------
// Group aggregates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct GroupTotals {
    pub total: f64,
    pub subtotal: f64,
    pub delivery: f64,
    pub discount: f64,
    pub order_count: usize,
    /// Line items across all orders.
    pub item_count: usize,
    pub unit_count: u64,
}

pub fn group_totals(group: &DispatchGroup) -> GroupTotals {
    group
        .orders
        .iter()
        .fold(GroupTotals::default(), |mut acc, o| {
            acc.total += o.total;
            acc.subtotal += o.subtotal;
            acc.delivery += o.delivery;
            acc.discount += o.discount;
            acc.order_count += 1;
            acc.item_count += o.items.len();
            acc.unit_count += o.items.iter().map(|i| u64::from(i.qty)).sum::<u64>();
            acc
        })
}

/// Non-empty order notes, in order.
pub fn group_notes(group: &DispatchGroup) -> Vec<String> {
    group
        .orders
        .iter()
        .filter_map(|o| o.notes.as_deref())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn order_count(groups: &[DispatchGroup]) -> usize {
    groups.iter().map(|g| g.orders.len()).sum()
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupView {
    #[serde(flatten)]
    pub group: DispatchGroup,
    pub totals: GroupTotals,
    pub notes: Vec<String>,
    pub items: Vec<OrderItem>,
}

impl GroupView {
    pub fn new(group: &DispatchGroup) -> Self {
        Self {
            totals: group_totals(group),
            notes: group_notes(group),
            items: group
                .orders
                .iter()
                .flat_map(|o| o.items.iter().cloned())
                .collect(),
            group: group.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Packing checklist
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistItem {
    ItemsPacked,
    InvoicePrinted,
    PaymentConfirmed,
    FragileHandled,
}

impl ChecklistItem {
    pub fn label(&self) -> &'static str {
        match self {
            ChecklistItem::ItemsPacked => "All items packed",
            ChecklistItem::InvoicePrinted => "Invoice printed and attached",
            ChecklistItem::PaymentConfirmed => "Payment status confirmed",
            ChecklistItem::FragileHandled => "Fragile items wrapped and labelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "items_packed" => Some(ChecklistItem::ItemsPacked),
            "invoice_printed" => Some(ChecklistItem::InvoicePrinted),
            "payment_confirmed" => Some(ChecklistItem::PaymentConfirmed),
            "fragile_handled" => Some(ChecklistItem::FragileHandled),
            _ => None,
        }
    }
}

pub fn is_fragile(notes: Option<&str>) -> bool {
    notes.is_some_and(|n| n.to_lowercase().contains("fragile"))
}

/// Gate in front of pending → processing. Confirm is enabled only while
/// every required step is ticked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackingChecklist {
    pub order_id: OrderId,
    steps: Vec<(ChecklistItem, bool)>,
}

impl PackingChecklist {
    pub fn for_order(order: &Order) -> Self {
        let mut steps = vec![
            (ChecklistItem::ItemsPacked, false),
            (ChecklistItem::InvoicePrinted, false),
            (ChecklistItem::PaymentConfirmed, false),
        ];
        if is_fragile(order.notes.as_deref()) {
            steps.push((ChecklistItem::FragileHandled, false));
        }
        Self {
            order_id: order.id,
            steps,
        }
    }

    pub fn items(&self) -> impl Iterator<Item = ChecklistItem> + '_ {
        self.steps.iter().map(|(item, _)| *item)
    }

    pub fn requires(&self, item: ChecklistItem) -> bool {
        self.steps.iter().any(|(i, _)| *i == item)
    }

    pub fn is_checked(&self, item: ChecklistItem) -> bool {
        self.steps.iter().any(|(i, done)| *i == item && *done)
    }

    /// Tick or untick a step. Returns `false` for a step this order does
    /// not have.
    pub fn set(&mut self, item: ChecklistItem, checked: bool) -> bool {
        match self.steps.iter_mut().find(|(i, _)| *i == item) {
            Some(step) => {
                step.1 = checked;
                true
            }
            None => false,
        }
    }

    pub fn toggle(&mut self, item: ChecklistItem) -> bool {
        let checked = self.is_checked(item);
        self.set(item, !checked)
    }

    pub fn can_confirm(&self) -> bool {
        self.steps.iter().all(|(_, done)| *done)
    }
}

// ---------------------------------------------------------------------------
// Bulk dispatch confirmation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum BulkTarget {
    Customer { customer_id: CustomerId },
    AllPending,
}

/// Proof the operator saw and accepted a bulk dispatch prompt. Only this
/// module can create one, and dispatching consumes it.
#[derive(Debug, PartialEq, Serialize)]
pub struct BulkConfirmation {
    target: BulkTarget,
    order_count: usize,
    prompt: String,
}

impl BulkConfirmation {
    pub fn target(&self) -> BulkTarget {
        self.target
    }

    pub fn order_count(&self) -> usize {
        self.order_count
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    fn new(target: BulkTarget, order_count: usize) -> Self {
        let prompt = match target {
            BulkTarget::AllPending => {
                format!("Mark all {order_count} pending orders as dispatched?")
            }
            BulkTarget::Customer { .. } => {
                format!("Mark {order_count} orders for this customer as dispatched?")
            }
        };
        Self {
            target,
            order_count,
            prompt,
        }
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct DispatchBoard {
    filter: DispatchFilter,
    groups: Vec<DispatchGroup>,
    seq: RequestSequencer,
    checklists: HashMap<OrderId, PackingChecklist>,
}

impl DispatchBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(&self) -> DispatchFilter {
        self.filter
    }

    pub fn groups(&self) -> &[DispatchGroup] {
        &self.groups
    }

    pub fn views(&self) -> Vec<GroupView> {
        self.groups.iter().map(GroupView::new).collect()
    }

    /// Orders the "mark all dispatched" button would affect. Only known on
    /// the pending tab.
    pub fn pending_count(&self) -> usize {
        if self.filter == DispatchFilter::Pending {
            order_count(&self.groups)
        } else {
            0
        }
    }

    fn find_order(&self, id: OrderId) -> Option<&Order> {
        self.groups
            .iter()
            .flat_map(|g| g.orders.iter())
            .find(|o| o.id == id)
    }

    /// Switch tab; the returned token tags the list request.
    pub fn set_filter(&mut self, filter: DispatchFilter) -> RequestToken {
        if filter != self.filter {
            self.groups.clear();
        }
        self.filter = filter;
        self.seq.issue()
    }

    /// Apply a list response. Stale responses (older tab, slower poll) are
    /// dropped.
    pub fn apply(&mut self, token: RequestToken, groups: Vec<DispatchGroup>) -> bool {
        if !self.seq.is_current(token) {
            return false;
        }
        self.checklists
            .retain(|id, _| groups.iter().flat_map(|g| &g.orders).any(|o| o.id == *id));
        self.groups = groups;
        true
    }

    /// Tag a reload of the current tab. Fetch with the returned filter and
    /// hand the answer to [`apply`](Self::apply).
    pub fn begin_refresh(&mut self) -> (RequestToken, DispatchFilter) {
        (self.seq.issue(), self.filter)
    }

    pub async fn refresh(&mut self, backend: &dyn Backend) -> ApiResult<bool> {
        let (token, filter) = self.begin_refresh();
        let groups = backend.list_dispatch(filter).await?;
        Ok(self.apply(token, groups))
    }

    /// Reload after a mutation the backend already accepted. A failed reload
    /// leaves the old list up until the next poll.
    async fn refresh_after_change(&mut self, backend: &dyn Backend) {
        if let Err(e) = self.refresh(backend).await {
            warn!(error = %e, "dispatch reload after update failed");
        }
    }

    // -----------------------------------------------------------------------
    // Packing
    // -----------------------------------------------------------------------

    /// Open (or return the open) checklist for a pending order.
    pub fn checklist(&mut self, order_id: OrderId) -> ApiResult<&mut PackingChecklist> {
        let order = self
            .find_order(order_id)
            .ok_or_else(|| ApiError::Validation(format!("Order {order_id} is not on the board")))?;
        if order.status != OrderStatus::Pending {
            return Err(ApiError::Validation("Only pending orders can be packed".into()));
        }
        let checklist = PackingChecklist::for_order(order);
        Ok(self.checklists.entry(order_id).or_insert(checklist))
    }

    /// pending → processing, once the checklist is complete.
    pub async fn pack(&mut self, backend: &dyn Backend, order_id: OrderId) -> ApiResult<()> {
        let ready = self
            .checklists
            .get(&order_id)
            .is_some_and(PackingChecklist::can_confirm);
        if !ready {
            return Err(ApiError::Validation(
                "Complete the packing checklist first".into(),
            ));
        }
        backend
            .update_order_status(order_id, OrderStatus::Processing)
            .await?;
        self.checklists.remove(&order_id);
        info!(order_id, "order packed");
        self.refresh_after_change(backend).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Dispatching
    // -----------------------------------------------------------------------

    /// processing → dispatched for one order.
    pub async fn dispatch_order(&mut self, backend: &dyn Backend, order_id: OrderId) -> ApiResult<()> {
        if let Some(order) = self.find_order(order_id) {
            if order.status != OrderStatus::Processing {
                return Err(ApiError::Validation(
                    "Pack the order before dispatching it".into(),
                ));
            }
        }
        backend
            .update_order_status(order_id, OrderStatus::Dispatched)
            .await?;
        info!(order_id, "order dispatched");
        self.refresh_after_change(backend).await;
        Ok(())
    }

    /// Confirmation prompt for dispatching one customer's open orders.
    pub fn confirm_customer(&self, customer_id: CustomerId) -> ApiResult<BulkConfirmation> {
        let group = self
            .groups
            .iter()
            .find(|g| g.customer_id == customer_id)
            .ok_or_else(|| ApiError::Validation("Customer has no orders on the board".into()))?;
        let open = group
            .orders
            .iter()
            .filter(|o| matches!(o.status, OrderStatus::Pending | OrderStatus::Processing))
            .count();
        if open == 0 {
            return Err(ApiError::Validation("Nothing left to dispatch".into()));
        }
        Ok(BulkConfirmation::new(
            BulkTarget::Customer { customer_id },
            open,
        ))
    }

    /// Confirmation prompt for dispatching every pending order.
    pub fn confirm_all(&self, pending_count: usize) -> ApiResult<BulkConfirmation> {
        if pending_count == 0 {
            return Err(ApiError::Validation("No pending orders".into()));
        }
        Ok(BulkConfirmation::new(BulkTarget::AllPending, pending_count))
    }

    /// Run a confirmed bulk dispatch.
    pub async fn dispatch_bulk(
        &mut self,
        backend: &dyn Backend,
        confirmation: BulkConfirmation,
    ) -> ApiResult<DispatchAllResult> {
        let result = match confirmation.target {
            BulkTarget::Customer { customer_id } => {
                let r = backend.dispatch_customer(customer_id).await?;
                info!(customer_id, affected = r.affected, "customer orders dispatched");
                r
            }
            BulkTarget::AllPending => {
                let r = backend.dispatch_all().await?;
                info!(affected = r.affected, "all pending orders dispatched");
                r
            }
        };
        self.refresh_after_change(backend).await;
        Ok(result)
    }

    /// Any open order → cancelled.
    pub async fn cancel_order(&mut self, backend: &dyn Backend, order_id: OrderId) -> ApiResult<()> {
        if let Some(order) = self.find_order(order_id) {
            if matches!(order.status, OrderStatus::Dispatched | OrderStatus::Cancelled) {
                return Err(ApiError::Validation(format!(
                    "Order is already {}",
                    order.status.as_str()
                )));
            }
        }
        backend
            .update_order_status(order_id, OrderStatus::Cancelled)
            .await?;
        self.checklists.remove(&order_id);
        info!(order_id, "order cancelled");
        self.refresh_after_change(backend).await;
        Ok(())
    }
}
