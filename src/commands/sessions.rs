use serde::Serialize;
use serde_json::{json, Value};

use super::orders::OrderRow;
use super::{parse_payload, payload_id, report, to_json, CommandResult};
use crate::format;
use crate::models::{Session, SessionInput};
use crate::AppContext;

const ID_KEYS: &[&str] = &["sessionId", "session_id", "id"];

#[derive(Debug, Serialize)]
struct SessionRow<'a> {
    #[serde(flatten)]
    session: &'a Session,
    label: String,
    date_label: String,
    revenue_label: String,
    badge: &'static str,
}

impl<'a> SessionRow<'a> {
    fn new(session: &'a Session) -> Self {
        Self {
            label: session.label(),
            date_label: format::date(session.session_date.as_deref()),
            revenue_label: format::money(session.revenue),
            badge: format::status_badge(session.status.as_str()),
            session,
        }
    }
}

pub async fn session_list(ctx: &AppContext) -> CommandResult {
    let sessions = ctx
        .api
        .list_sessions()
        .await
        .map_err(|e| report(ctx, "session_list", e))?;
    to_json(&sessions.iter().map(SessionRow::new).collect::<Vec<_>>())
}

/// Session detail with its orders.
pub async fn session_get(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ID_KEYS)?;
    let session = ctx
        .api
        .get_session(id)
        .await
        .map_err(|e| report(ctx, "session_get", e))?;
    let orders: Vec<OrderRow<'_>> = session.orders.iter().map(OrderRow::new).collect();
    let mut detail = to_json(&SessionRow::new(&session))?;
    detail["orders"] = to_json(&orders)?;
    Ok(detail)
}

pub async fn session_create(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let input: SessionInput = parse_payload(arg0, "session")?;
    input.validate().map_err(|e| e.to_string())?;
    let session = ctx
        .api
        .create_session(&input)
        .await
        .map_err(|e| report(ctx, "session_create", e))?;
    ctx.store.success("Session created");
    to_json(&SessionRow::new(&session))
}

pub async fn session_update(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ID_KEYS)?;
    let input: SessionInput = parse_payload(arg0, "session")?;
    input.validate().map_err(|e| e.to_string())?;
    let session = ctx
        .api
        .update_session(id, &input)
        .await
        .map_err(|e| report(ctx, "session_update", e))?;
    ctx.store.success("Session updated");
    to_json(&SessionRow::new(&session))
}

pub async fn session_delete(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ID_KEYS)?;
    ctx.api
        .delete_session(id)
        .await
        .map_err(|e| report(ctx, "session_delete", e))?;
    ctx.store.success("Session deleted");
    Ok(json!({ "success": true, "id": id }))
}
