use serde_json::{json, Map, Value};

use super::{payload_id, report, to_json, value_str, CommandResult};
use crate::config::DetectorBackend;
use crate::diagnostics::{self, HealthInputs};
use crate::models::StoreSettings;
use crate::state::{Action, Page};
use crate::AppContext;

pub async fn settings_get(ctx: &AppContext) -> CommandResult {
    let settings = ctx
        .load_settings()
        .await
        .map_err(|e| report(ctx, "settings_get", e))?;
    to_json(&settings)
}

/// Save store settings. Keys the payload omits keep their current value.
pub async fn settings_save(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let Some(Value::Object(changes)) = arg0 else {
        return Err("Settings payload must be an object".into());
    };
    let mut merged: Map<String, Value> = ctx.store.snapshot().settings.0;
    merged.extend(changes);
    let settings = StoreSettings(merged);

    ctx.api
        .save_settings(&settings)
        .await
        .map_err(|e| report(ctx, "settings_save", e))?;
    ctx.draft
        .lock()
        .await
        .set_default_delivery(settings.default_delivery());
    ctx.store.dispatch(Action::SettingsLoaded(settings.clone()));
    ctx.store.success("Settings saved");
    to_json(&settings)
}

pub async fn dashboard_get(ctx: &AppContext) -> CommandResult {
    let dashboard = ctx
        .api
        .dashboard()
        .await
        .map_err(|e| report(ctx, "dashboard_get", e))?;
    ctx.store.dispatch(Action::DashboardLoaded(dashboard.clone()));
    to_json(&dashboard)
}

pub async fn app_state(ctx: &AppContext) -> CommandResult {
    to_json(&ctx.store.snapshot())
}

pub async fn app_navigate(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let raw = value_str(arg0.as_ref(), &["page"]).ok_or("Missing page")?;
    let page = Page::parse(&raw).ok_or_else(|| format!("Unknown page: {raw}"))?;
    ctx.store.dispatch(Action::Navigate(page));
    Ok(json!({ "page": page.as_str(), "title": page.label() }))
}

pub async fn notification_dismiss(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), &["id", "notificationId"])?;
    ctx.store.dispatch(Action::Dismiss(id as u64));
    Ok(json!({ "success": true }))
}

pub async fn app_health(ctx: &AppContext) -> CommandResult {
    let state = ctx.store.snapshot();
    let camera_in_use = ctx.scanner.lock().await.camera_in_use();
    Ok(diagnostics::health_snapshot(&HealthInputs {
        api_base_url: ctx.api.base_url(),
        backend_online: state.backend_online,
        camera_in_use,
        ai_key_present: ctx.keys.has_key(),
        detector: match ctx.config.detector {
            DetectorBackend::Bundled => "bundled",
            DetectorBackend::Serial => "serial",
        },
        pending_orders: state.pending_count,
    }))
}
