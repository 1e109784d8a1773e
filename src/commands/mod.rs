//! Command surface for the desktop shell.
//!
//! Every command takes an optional JSON payload and returns a JSON value or
//! an error string. Payload keys are accepted in camelCase and snake_case.
//! Backend failures are also posted to the notification tray so the shell
//! only has to render the store.

pub mod customers;
pub mod dispatch;
pub mod orders;
pub mod products;
pub mod scanner;
pub mod sessions;
pub mod settings;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::AppContext;

pub type CommandResult = Result<Value, String>;

/// Route `command` to its handler.
pub async fn invoke(ctx: &AppContext, command: &str, arg0: Option<Value>) -> CommandResult {
    match command {
        // products
        "product_list" => products::product_list(ctx, arg0).await,
        "product_get" => products::product_get(ctx, arg0).await,
        "product_categories" => products::product_categories(ctx).await,
        "product_create" => products::product_create(ctx, arg0).await,
        "product_update" => products::product_update(ctx, arg0).await,
        "product_update_stock" => products::product_update_stock(ctx, arg0).await,
        "product_delete" => products::product_delete(ctx, arg0).await,
        "product_labels" => products::product_labels(ctx, arg0).await,

        // customers
        "customer_list" => customers::customer_list(ctx, arg0).await,
        "customer_get" => customers::customer_get(ctx, arg0).await,
        "customer_create" => customers::customer_create(ctx, arg0).await,
        "customer_update" => customers::customer_update(ctx, arg0).await,
        "customer_delete" => customers::customer_delete(ctx, arg0).await,

        // sessions
        "session_list" => sessions::session_list(ctx).await,
        "session_get" => sessions::session_get(ctx, arg0).await,
        "session_create" => sessions::session_create(ctx, arg0).await,
        "session_update" => sessions::session_update(ctx, arg0).await,
        "session_delete" => sessions::session_delete(ctx, arg0).await,

        // draft order + orders
        "order_draft_get" => orders::order_draft_get(ctx).await,
        "order_draft_add_product" => orders::order_draft_add_product(ctx, arg0).await,
        "order_draft_change_qty" => orders::order_draft_change_qty(ctx, arg0).await,
        "order_draft_change_price" => orders::order_draft_change_price(ctx, arg0).await,
        "order_draft_remove_item" => orders::order_draft_remove_item(ctx, arg0).await,
        "order_draft_update" => orders::order_draft_update(ctx, arg0).await,
        "order_draft_select_customer" => orders::order_draft_select_customer(ctx, arg0).await,
        "order_draft_select_session" => orders::order_draft_select_session(ctx, arg0).await,
        "order_draft_create_customer" => orders::order_draft_create_customer(ctx, arg0).await,
        "order_draft_search_customers" => orders::order_draft_search_customers(ctx, arg0).await,
        "order_draft_search_products" => orders::order_draft_search_products(ctx, arg0).await,
        "order_draft_preview_save" => orders::order_draft_preview_save(ctx, arg0).await,
        "order_draft_save" => orders::order_draft_save(ctx, arg0).await,
        "order_draft_reset" => orders::order_draft_reset(ctx).await,
        "order_list" => orders::order_list(ctx, arg0).await,
        "order_get" => orders::order_get(ctx, arg0).await,
        "order_update_status" => orders::order_update_status(ctx, arg0).await,
        "order_delete" => orders::order_delete(ctx, arg0).await,

        // scanner
        "scanner_get_state" => scanner::scanner_get_state(ctx).await,
        "scanner_set_mode" => scanner::scanner_set_mode(ctx, arg0).await,
        "scanner_start" => scanner::scanner_start(ctx).await,
        "scanner_stop" => scanner::scanner_stop(ctx).await,
        "scanner_push_frame" => scanner::scanner_push_frame(ctx, arg0).await,
        "scanner_manual_lookup" => scanner::scanner_manual_lookup(ctx, arg0).await,
        "scanner_select_label" => scanner::scanner_select_label(ctx, arg0).await,
        "scanner_identify" => scanner::scanner_identify(ctx).await,
        "scanner_clear_match" => scanner::scanner_clear_match(ctx).await,
        "scanner_add_to_order" => scanner::scanner_add_to_order(ctx).await,
        "ai_key_status" => scanner::ai_key_status(ctx).await,
        "ai_key_save" => scanner::ai_key_save(ctx, arg0).await,
        "ai_key_clear" => scanner::ai_key_clear(ctx).await,

        // dispatch
        "dispatch_list" => dispatch::dispatch_list(ctx, arg0).await,
        "dispatch_checklist" => dispatch::dispatch_checklist(ctx, arg0).await,
        "dispatch_checklist_set" => dispatch::dispatch_checklist_set(ctx, arg0).await,
        "dispatch_pack" => dispatch::dispatch_pack(ctx, arg0).await,
        "dispatch_order" => dispatch::dispatch_order(ctx, arg0).await,
        "dispatch_cancel_order" => dispatch::dispatch_cancel_order(ctx, arg0).await,
        "dispatch_request_customer" => dispatch::dispatch_request_customer(ctx, arg0).await,
        "dispatch_request_all" => dispatch::dispatch_request_all(ctx).await,
        "dispatch_confirm" => dispatch::dispatch_confirm(ctx).await,
        "dispatch_abort" => dispatch::dispatch_abort(ctx).await,

        // app / settings
        "settings_get" => settings::settings_get(ctx).await,
        "settings_save" => settings::settings_save(ctx, arg0).await,
        "dashboard_get" => settings::dashboard_get(ctx).await,
        "app_state" => settings::app_state(ctx).await,
        "app_navigate" => settings::app_navigate(ctx, arg0).await,
        "notification_dismiss" => settings::notification_dismiss(ctx, arg0).await,
        "app_health" => settings::app_health(ctx).await,
        "app_about" => Ok(crate::diagnostics::get_about_info()),

        other => Err(format!("Unknown command: {other}")),
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Deserialize the payload; a missing payload is an empty object.
pub(crate) fn parse_payload<T: DeserializeOwned>(
    arg0: Option<Value>,
    what: &str,
) -> Result<T, String> {
    let payload = arg0.unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(payload).map_err(|e| format!("Invalid {what} payload: {e}"))
}

/// A numeric id given bare (`42`, `"42"`) or as a field of an object.
pub(crate) fn payload_id(arg0: Option<&Value>, keys: &[&str]) -> Result<i64, String> {
    fn as_id(v: &Value) -> Option<i64> {
        match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
    let found = match arg0 {
        Some(Value::Object(obj)) => keys.iter().find_map(|k| obj.get(*k)).and_then(as_id),
        Some(v) => as_id(v),
        None => None,
    };
    found
        .filter(|id| *id > 0)
        .ok_or_else(|| format!("Missing {}", keys.first().copied().unwrap_or("id")))
}

/// Like [`payload_id`] but `null`, absent or empty means "none selected".
pub(crate) fn payload_opt_id(arg0: Option<&Value>, keys: &[&str]) -> Result<Option<i64>, String> {
    let value = match arg0 {
        Some(Value::Object(obj)) => keys.iter().find_map(|k| obj.get(*k)),
        other => other,
    };
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => payload_id(Some(v), keys).map(Some),
    }
}

/// First non-empty string among `keys`.
pub(crate) fn value_str(v: Option<&Value>, keys: &[&str]) -> Option<String> {
    let v = v?;
    if let Value::String(s) = v {
        let trimmed = s.trim();
        return (!trimmed.is_empty()).then(|| trimmed.to_string());
    }
    keys.iter()
        .filter_map(|k| v.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn value_f64(v: Option<&Value>, keys: &[&str]) -> Option<f64> {
    let v = v?;
    keys.iter().find_map(|k| match v.get(*k)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> CommandResult {
    serde_json::to_value(value).map_err(|e| format!("Failed to serialize response: {e}"))
}

/// Log a failed command, post it to the notification tray, and hand the
/// message back as the command error.
pub(crate) fn report(ctx: &AppContext, command: &str, err: impl std::fmt::Display) -> String {
    let message = err.to_string();
    warn!(command, error = %message, "command failed");
    ctx.store.error(message.clone());
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_id_shapes() {
        assert_eq!(payload_id(Some(&json!(7)), &["id"]), Ok(7));
        assert_eq!(payload_id(Some(&json!("12")), &["id"]), Ok(12));
        assert_eq!(
            payload_id(Some(&json!({ "orderId": 3 })), &["orderId", "order_id", "id"]),
            Ok(3)
        );
        assert_eq!(
            payload_id(Some(&json!({ "order_id": "4" })), &["orderId", "order_id"]),
            Ok(4)
        );
        assert_eq!(
            payload_id(Some(&json!({})), &["orderId"]),
            Err("Missing orderId".to_string())
        );
        assert!(payload_id(Some(&json!(0)), &["id"]).is_err());
        assert!(payload_id(None, &["id"]).is_err());
    }

    #[test]
    fn test_payload_opt_id_treats_null_as_none() {
        let keys = ["customerId", "customer_id"];
        assert_eq!(payload_opt_id(Some(&json!({ "customerId": null })), &keys), Ok(None));
        assert_eq!(payload_opt_id(Some(&json!({})), &keys), Ok(None));
        assert_eq!(payload_opt_id(None, &keys), Ok(None));
        assert_eq!(payload_opt_id(Some(&json!({ "customer_id": 9 })), &keys), Ok(Some(9)));
        assert!(payload_opt_id(Some(&json!({ "customerId": "abc" })), &keys).is_err());
    }

    #[test]
    fn test_value_helpers() {
        let v = json!({ "q": "  rice ", "price": "120.5", "delivery": 150 });
        assert_eq!(value_str(Some(&v), &["query", "q"]).as_deref(), Some("rice"));
        assert_eq!(value_str(Some(&json!("  ")), &["q"]), None);
        assert_eq!(value_f64(Some(&v), &["price"]), Some(120.5));
        assert_eq!(value_f64(Some(&v), &["delivery"]), Some(150.0));
        assert_eq!(value_f64(Some(&v), &["discount"]), None);
    }

    #[test]
    fn test_parse_payload_defaults_to_empty_object() {
        #[derive(serde::Deserialize)]
        struct Query {
            #[serde(default)]
            q: Option<String>,
        }
        let parsed: Query = parse_payload(None, "query").unwrap();
        assert!(parsed.q.is_none());
        let err = parse_payload::<Query>(Some(json!([1])), "query").err().unwrap();
        assert!(err.starts_with("Invalid query payload"));
    }
}
