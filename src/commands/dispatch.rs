use serde_json::{json, Value};

use super::{payload_id, report, to_json, value_str, CommandResult};
use crate::dispatch::{BulkConfirmation, ChecklistItem, DispatchBoard, PackingChecklist};
use crate::models::DispatchFilter;
use crate::AppContext;

const ORDER_KEYS: &[&str] = &["orderId", "order_id", "id"];
const CUSTOMER_KEYS: &[&str] = &["customerId", "customer_id", "id"];

fn board_json(board: &DispatchBoard) -> CommandResult {
    Ok(json!({
        "filter": board.filter().as_str(),
        "groups": to_json(&board.views())?,
        "pendingCount": board.pending_count(),
    }))
}

fn checklist_json(checklist: &PackingChecklist) -> Value {
    let steps: Vec<Value> = checklist
        .items()
        .map(|item| {
            json!({
                "item": item,
                "label": item.label(),
                "checked": checklist.is_checked(item),
            })
        })
        .collect();
    json!({
        "orderId": checklist.order_id,
        "steps": steps,
        "canConfirm": checklist.can_confirm(),
    })
}

fn confirmation_json(confirmation: &BulkConfirmation) -> CommandResult {
    Ok(json!({
        "target": to_json(&confirmation.target())?,
        "orderCount": confirmation.order_count(),
        "prompt": confirmation.prompt(),
    }))
}

/// Switch tab (or reload the current one). A slower answer for a tab the
/// operator already left is dropped.
pub async fn dispatch_list(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let filter = match value_str(arg0.as_ref(), &["filter", "status"]) {
        Some(raw) => {
            DispatchFilter::parse(&raw).ok_or_else(|| format!("Unknown dispatch filter: {raw}"))?
        }
        None => ctx.board.lock().await.filter(),
    };
    let token = ctx.board.lock().await.set_filter(filter);
    let groups = ctx
        .backend()
        .list_dispatch(filter)
        .await
        .map_err(|e| report(ctx, "dispatch_list", e))?;
    let mut board = ctx.board.lock().await;
    let applied = board.apply(token, groups);
    let mut out = board_json(&board)?;
    out["applied"] = json!(applied);
    Ok(out)
}

pub async fn dispatch_checklist(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ORDER_KEYS)?;
    let mut board = ctx.board.lock().await;
    let checklist = board.checklist(id).map_err(|e| e.to_string())?;
    Ok(checklist_json(checklist))
}

/// Tick or untick one step; without `checked` the step toggles.
pub async fn dispatch_checklist_set(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ORDER_KEYS)?;
    let raw = value_str(arg0.as_ref(), &["item", "step"]).ok_or("Missing item")?;
    let item = ChecklistItem::parse(&raw).ok_or_else(|| format!("Unknown checklist item: {raw}"))?;
    let checked = arg0
        .as_ref()
        .and_then(|v| v.get("checked"))
        .and_then(Value::as_bool);

    let mut board = ctx.board.lock().await;
    let checklist = board.checklist(id).map_err(|e| e.to_string())?;
    let known = match checked {
        Some(checked) => checklist.set(item, checked),
        None => checklist.toggle(item),
    };
    if !known {
        return Err(format!("{} is not required for this order", item.label()));
    }
    Ok(checklist_json(checklist))
}

pub async fn dispatch_pack(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ORDER_KEYS)?;
    let mut board = ctx.board.lock().await;
    board
        .pack(ctx.backend(), id)
        .await
        .map_err(|e| report(ctx, "dispatch_pack", e))?;
    ctx.store.success(format!("Order #{id} packed"));
    ctx.refresh_now();
    board_json(&board)
}

pub async fn dispatch_order(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ORDER_KEYS)?;
    let mut board = ctx.board.lock().await;
    board
        .dispatch_order(ctx.backend(), id)
        .await
        .map_err(|e| report(ctx, "dispatch_order", e))?;
    ctx.store.success(format!("Order #{id} dispatched"));
    ctx.refresh_now();
    board_json(&board)
}

pub async fn dispatch_cancel_order(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ORDER_KEYS)?;
    let mut board = ctx.board.lock().await;
    board
        .cancel_order(ctx.backend(), id)
        .await
        .map_err(|e| report(ctx, "dispatch_cancel_order", e))?;
    ctx.store.success(format!("Order #{id} cancelled"));
    ctx.refresh_now();
    board_json(&board)
}

// ---------------------------------------------------------------------------
// Bulk dispatch: request → confirm (or abort)
// ---------------------------------------------------------------------------

pub async fn dispatch_request_customer(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let customer_id = payload_id(arg0.as_ref(), CUSTOMER_KEYS)?;
    let confirmation = ctx
        .board
        .lock()
        .await
        .confirm_customer(customer_id)
        .map_err(|e| e.to_string())?;
    let out = confirmation_json(&confirmation)?;
    ctx.set_pending_bulk(Some(confirmation));
    Ok(out)
}

pub async fn dispatch_request_all(ctx: &AppContext) -> CommandResult {
    let board = ctx.board.lock().await;
    let pending = if board.filter() == DispatchFilter::Pending {
        board.pending_count()
    } else {
        ctx.store.snapshot().pending_count
    };
    let confirmation = board.confirm_all(pending).map_err(|e| e.to_string())?;
    drop(board);
    let out = confirmation_json(&confirmation)?;
    ctx.set_pending_bulk(Some(confirmation));
    Ok(out)
}

pub async fn dispatch_confirm(ctx: &AppContext) -> CommandResult {
    let confirmation = ctx
        .take_pending_bulk()
        .ok_or("Nothing is waiting for confirmation")?;
    let mut board = ctx.board.lock().await;
    let result = board
        .dispatch_bulk(ctx.backend(), confirmation)
        .await
        .map_err(|e| report(ctx, "dispatch_confirm", e))?;
    ctx.store
        .success(format!("{} orders dispatched", result.affected));
    ctx.refresh_now();
    let mut out = board_json(&board)?;
    out["affected"] = json!(result.affected);
    Ok(out)
}

pub async fn dispatch_abort(ctx: &AppContext) -> CommandResult {
    let had = ctx.take_pending_bulk().is_some();
    Ok(json!({ "aborted": had }))
}
