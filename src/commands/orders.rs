use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::{
    parse_payload, payload_id, payload_opt_id, report, to_json, value_f64, value_str,
    CommandResult,
};
use crate::draft::{self, DraftOrder, SaveMode, SavePlan};
use crate::format;
use crate::models::{Order, OrderQuery, OrderStatus, Payment};
use crate::AppContext;

const ORDER_KEYS: &[&str] = &["orderId", "order_id", "id"];
const PRODUCT_KEYS: &[&str] = &["productId", "product_id", "id"];
const CUSTOMER_KEYS: &[&str] = &["customerId", "customer_id"];
const SESSION_KEYS: &[&str] = &["sessionId", "session_id"];

/// An order with its display labels.
#[derive(Debug, Serialize)]
pub(crate) struct OrderRow<'a> {
    #[serde(flatten)]
    order: &'a Order,
    invoice_number: String,
    date_label: String,
    total_label: String,
    status_badge: &'static str,
    payment_badge: &'static str,
}

impl<'a> OrderRow<'a> {
    pub(crate) fn new(order: &'a Order) -> Self {
        Self {
            invoice_number: format::invoice_number(order.id),
            date_label: format::date_time(order.created_at.as_deref()),
            total_label: format::money(order.total),
            status_badge: format::status_badge(order.status.as_str()),
            payment_badge: format::status_badge(order.payment.as_str()),
            order,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SavePayload {
    #[serde(default, alias = "force_new", alias = "separate")]
    force_new: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct OrderListPayload {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "customer_id")]
    customer_id: Option<i64>,
    #[serde(default, alias = "session_id")]
    session_id: Option<i64>,
    #[serde(default)]
    limit: Option<u32>,
}

fn draft_json(draft: &DraftOrder) -> CommandResult {
    to_json(&draft.view())
}

// ---------------------------------------------------------------------------
// Draft order
// ---------------------------------------------------------------------------

pub async fn order_draft_get(ctx: &AppContext) -> CommandResult {
    draft_json(&*ctx.draft.lock().await)
}

pub async fn order_draft_add_product(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), PRODUCT_KEYS)?;
    let product = ctx
        .api
        .get_product(id)
        .await
        .map_err(|e| report(ctx, "order_draft_add_product", e))?;
    let mut draft = ctx.draft.lock().await;
    draft.add_product(&product);
    draft_json(&draft)
}

pub async fn order_draft_change_qty(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), PRODUCT_KEYS)?;
    let delta = value_f64(arg0.as_ref(), &["delta", "change"]).ok_or("Missing delta")? as i64;
    let mut draft = ctx.draft.lock().await;
    if !draft.cart_mut().change_qty(id, delta) {
        return Err("Product is not in the cart".into());
    }
    draft_json(&draft)
}

/// Price edits are free text; anything unparseable becomes 0.
pub async fn order_draft_change_price(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), PRODUCT_KEYS)?;
    let raw = match arg0.as_ref().and_then(|v| v.get("price").or_else(|| v.get("unitPrice"))) {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };
    let mut draft = ctx.draft.lock().await;
    if !draft.cart_mut().change_price(id, &raw) {
        return Err("Product is not in the cart".into());
    }
    draft_json(&draft)
}

pub async fn order_draft_remove_item(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), PRODUCT_KEYS)?;
    let mut draft = ctx.draft.lock().await;
    draft.cart_mut().remove_item(id);
    draft_json(&draft)
}

/// Delivery, discount, payment method and note. Charges are locked while
/// the save would merge into an existing order.
pub async fn order_draft_update(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let payload = arg0.as_ref();
    let delivery = value_f64(payload, &["delivery"]);
    let discount = value_f64(payload, &["discount"]);
    let payment = match value_str(payload, &["payment"]) {
        Some(raw) => {
            Some(Payment::parse(&raw).ok_or_else(|| format!("Unknown payment method: {raw}"))?)
        }
        None => None,
    };
    let note = payload
        .and_then(|v| v.get("note").or_else(|| v.get("notes")))
        .and_then(Value::as_str);

    let mut draft = ctx.draft.lock().await;
    if (delivery.is_some() || discount.is_some()) && draft.existing().is_some() {
        return Err("Delivery and discount come from the existing order".into());
    }
    if let Some(delivery) = delivery {
        draft.set_delivery(delivery);
    }
    if let Some(discount) = discount {
        draft.set_discount(discount);
    }
    if let Some(payment) = payment {
        draft.set_payment(payment);
    }
    if let Some(note) = note {
        draft.set_note(note);
    }
    draft_json(&draft)
}

/// Pick (or clear) the customer. A slow fetch for an earlier pick never
/// overrides a later one, and the draft stays unlocked while the backend
/// answers.
pub async fn order_draft_select_customer(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_opt_id(arg0.as_ref(), CUSTOMER_KEYS)?;
    let applied = draft::pick_customer(&ctx.draft, ctx.backend(), id)
        .await
        .map_err(|e| report(ctx, "order_draft_select_customer", e))?;
    let mut out = draft_json(&*ctx.draft.lock().await)?;
    out["applied"] = json!(applied);
    Ok(out)
}

pub async fn order_draft_select_session(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let session_id = payload_opt_id(arg0.as_ref(), SESSION_KEYS)?;
    let check = ctx.draft.lock().await.select_session(session_id);
    if let Some(check) = check {
        draft::run_existing_check(&ctx.draft, ctx.backend(), check)
            .await
            .map_err(|e| report(ctx, "order_draft_select_session", e))?;
    }
    draft_json(&*ctx.draft.lock().await)
}

pub async fn order_draft_create_customer(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let input = parse_payload(arg0, "customer")?;
    let customer = draft::create_customer(&ctx.draft, ctx.backend(), &input)
        .await
        .map_err(|e| report(ctx, "order_draft_create_customer", e))?;
    ctx.store.success(format!("Customer {} added", customer.name));
    draft_json(&*ctx.draft.lock().await)
}

/// Search-as-you-type. The draft lock is released while the request is in
/// flight, so a newer keystroke can overtake it; stale answers are dropped.
pub async fn order_draft_search_customers(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let q = value_str(arg0.as_ref(), &["q", "query"]).unwrap_or_default();
    let Some(token) = ctx.draft.lock().await.customer_search.begin(&q) else {
        return Ok(json!({ "applied": true, "results": [] }));
    };
    let results = ctx
        .api
        .list_customers(Some(q.as_str()))
        .await
        .map_err(|e| report(ctx, "order_draft_search_customers", e))?;
    let mut draft = ctx.draft.lock().await;
    let applied = draft.customer_search.resolve(token, results);
    Ok(json!({
        "applied": applied,
        "results": to_json(&draft.customer_search.results())?,
    }))
}

pub async fn order_draft_search_products(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let q = value_str(arg0.as_ref(), &["q", "query"]).unwrap_or_default();
    let Some(token) = ctx.draft.lock().await.product_search.begin(&q) else {
        return Ok(json!({ "applied": true, "results": [] }));
    };
    let results = ctx
        .backend()
        .search_products(&q)
        .await
        .map_err(|e| report(ctx, "order_draft_search_products", e))?;
    let mut draft = ctx.draft.lock().await;
    let applied = draft.product_search.resolve(token, results);
    Ok(json!({
        "applied": applied,
        "results": to_json(&draft.product_search.results())?,
    }))
}

/// What saving would do right now: a plain create, or the merge
/// confirmation with the combined total.
pub async fn order_draft_preview_save(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let payload: SavePayload = parse_payload(arg0, "save")?;
    let draft = ctx.draft.lock().await;
    let plan = draft.plan_save(payload.force_new).map_err(|e| e.to_string())?;
    match plan {
        SavePlan::Create(order) => Ok(json!({
            "mode": to_json(&SaveMode::Create)?,
            "order": to_json(&order)?,
        })),
        SavePlan::Merge {
            order_id, preview, ..
        } => Ok(json!({
            "mode": to_json(&SaveMode::Merge { order_id })?,
            "preview": to_json(&preview)?,
        })),
    }
}

pub async fn order_draft_save(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let payload: SavePayload = parse_payload(arg0, "save")?;
    let mut draft = ctx.draft.lock().await;
    let plan = draft.plan_save(payload.force_new).map_err(|e| e.to_string())?;
    let outcome = draft
        .execute(ctx.backend(), plan)
        .await
        .map_err(|e| report(ctx, "order_draft_save", e))?;
    drop(draft);

    let message = match outcome.mode {
        SaveMode::Create => format!("Order #{} created", outcome.order.id),
        SaveMode::Merge { order_id } => format!("Items added to order #{order_id}"),
    };
    info!(order_id = outcome.order.id, mode = ?outcome.mode, "draft saved");
    ctx.store.success(message);
    ctx.refresh_now();

    Ok(json!({
        "mode": to_json(&outcome.mode)?,
        "order": to_json(&OrderRow::new(&outcome.order))?,
    }))
}

pub async fn order_draft_reset(ctx: &AppContext) -> CommandResult {
    let mut draft = ctx.draft.lock().await;
    draft.reset();
    draft_json(&draft)
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

pub async fn order_list(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let payload: OrderListPayload = parse_payload(arg0, "order list")?;
    let status = match payload.status.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(raw) => Some(OrderStatus::parse(raw).ok_or_else(|| format!("Unknown status: {raw}"))?),
    };
    let orders = ctx
        .api
        .list_orders(&OrderQuery {
            status,
            customer_id: payload.customer_id,
            session_id: payload.session_id,
            limit: payload.limit,
        })
        .await
        .map_err(|e| report(ctx, "order_list", e))?;
    to_json(&orders.iter().map(OrderRow::new).collect::<Vec<_>>())
}

pub async fn order_get(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ORDER_KEYS)?;
    let order = ctx
        .api
        .get_order(id)
        .await
        .map_err(|e| report(ctx, "order_get", e))?;
    to_json(&OrderRow::new(&order))
}

pub async fn order_update_status(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ORDER_KEYS)?;
    let raw = value_str(arg0.as_ref(), &["status"]).ok_or("Missing status")?;
    let status = OrderStatus::parse(&raw).ok_or_else(|| format!("Unknown status: {raw}"))?;
    ctx.api
        .update_order_status(id, status)
        .await
        .map_err(|e| report(ctx, "order_update_status", e))?;
    ctx.store
        .success(format!("Order #{id} marked {}", status.as_str()));
    ctx.refresh_now();
    Ok(json!({ "success": true, "id": id, "status": status.as_str() }))
}

pub async fn order_delete(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ORDER_KEYS)?;
    ctx.api
        .delete_order(id)
        .await
        .map_err(|e| report(ctx, "order_delete", e))?;
    ctx.store.success(format!("Order #{id} deleted"));
    ctx.refresh_now();
    Ok(json!({ "success": true, "id": id }))
}
